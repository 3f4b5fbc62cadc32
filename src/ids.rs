//! Identifier allocation.

/// Id namespaces. Each one owns an independent counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdNamespace {
    /// Elements of the content document (`dtb1`, `dtb2`, ...).
    Content,
    /// `par` and `seq` elements of the sync files (`tcp1`, ...).
    Sync,
    /// Navigation index entries (`ncx1`, ...).
    Nav,
    /// Package manifest items (`item1`, ...).
    Manifest,
}

impl IdNamespace {
    /// Prefix prepended to the counter value.
    pub fn prefix(self) -> &'static str {
        match self {
            IdNamespace::Content => "dtb",
            IdNamespace::Sync => "tcp",
            IdNamespace::Nav => "ncx",
            IdNamespace::Manifest => "item",
        }
    }

    fn slot(self) -> usize {
        match self {
            IdNamespace::Content => 0,
            IdNamespace::Sync => 1,
            IdNamespace::Nav => 2,
            IdNamespace::Manifest => 3,
        }
    }
}

/// Per-export id generator.
///
/// Counters start at 1 and only move forward. The allocator is owned by a
/// single export run and threaded through every stage that mints ids.
#[derive(Debug, Default)]
pub struct IdentifierAllocator {
    counters: [u32; 4],
}

impl IdentifierAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next identifier in `ns`.
    pub fn next(&mut self, ns: IdNamespace) -> String {
        let counter = &mut self.counters[ns.slot()];
        *counter += 1;
        format!("{}{}", ns.prefix(), counter)
    }

    /// Number of identifiers handed out so far in `ns`.
    pub fn issued(&self, ns: IdNamespace) -> u32 {
        self.counters[ns.slot()]
    }
}
