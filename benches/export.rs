//! Benchmarks for the DAISY export pipeline.
//!
//! Run with: cargo bench

use criterion::{Criterion, criterion_group, criterion_main};

use daisybook::classify::LevelPolicy;
use daisybook::dtbook::{ContentDocumentBuilder, ReferenceResolver};
use daisybook::{AudioClip, DaisyExporter, Exporter, IdentifierAllocator, Metadata, Presentation};

/// A book with `chapters` narrated chapters, each with paragraphs, a page
/// number and a note that is referenced from the first paragraph.
fn generate_book(chapters: usize) -> Presentation {
    let mut book = Presentation::new("book").with_metadata(
        Metadata::new("Benchmark")
            .with_author("Criterion")
            .with_identifier("bench-uid"),
    );
    let body = book.append_element(book.root(), "bodymatter");
    let mut clock = 0;
    let mut clip = |book: &mut Presentation, id| {
        book.set_audio(id, AudioClip::new("book.mp3", clock, clock + 1200));
        clock += 1200;
    };

    for c in 0..chapters {
        let level = book.append_element(body, "level1");
        let h1 = book.append_element(level, "h1");
        book.append_text(h1, &format!("Chapter {}", c + 1));
        clip(&mut book, h1);

        let page = book.append_element(level, "pagenum");
        book.set_attribute(page, "page", "normal");
        book.append_text(page, &(c + 1).to_string());
        clip(&mut book, page);

        for p in 0..20 {
            let para = book.append_element(level, "p");
            book.append_text(para, "Lorem ipsum dolor sit amet, consectetur adipiscing elit.");
            if p == 0 {
                let noteref = book.append_element(para, "noteref");
                book.set_attribute(noteref, "idref", format!("#note-{c}"));
                book.append_text(noteref, "1");
            }
            clip(&mut book, para);
        }

        let note = book.append_element(level, "note");
        book.set_attribute(note, "id", format!("note-{c}"));
        let text = book.append_element(note, "p");
        book.append_text(text, "A note.");
        clip(&mut book, text);
    }
    book
}

fn bench_content_document(c: &mut Criterion) {
    let book = generate_book(50);

    c.bench_function("content_document", |b| {
        b.iter(|| {
            let mut ids = IdentifierAllocator::new();
            let mut doc = ContentDocumentBuilder::new(&book, &LevelPolicy, &mut ids).build();
            ReferenceResolver::new(&doc.id_map).resolve_all(&mut doc.xml, &doc.references)
        });
    });
}

fn bench_export(c: &mut Criterion) {
    let mut book = generate_book(50);
    let dir = tempfile::tempdir().unwrap();
    let exporter = DaisyExporter::new();

    c.bench_function("export_dtb", |b| {
        b.iter(|| exporter.export(&mut book, dir.path()).unwrap());
    });
}

criterion_group!(benches, bench_content_document, bench_export);
criterion_main!(benches);
