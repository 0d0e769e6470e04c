use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::thread;

use ldtools_core::code::CodeStandard;
use ldtools_core::colour::ColourValue;
use ldtools_core::document::{Document, Page, PageType};
use ldtools_core::element::{Element, ElementId};
use ldtools_core::geometry::Matrix4;
use ldtools_core::reference::Reference;
use ldtools_core::target::TargetStatus;
use ldtools_engine::analytics::{Fix, ProblemKind};
use ldtools_engine::{ChangeKind, DocumentEvent, Library, MemorySource, Workspace};

const PART: &str = "0 Brick\n0 Name: x.dat\n0 !LDRAW_ORG Part UPDATE 2020-01\n3 16 0 0 0 1 0 0 0 0 1\n";

fn reference_to(name: &str) -> Element {
    Element::reference(ColourValue::MAIN, Reference::new(name, Matrix4::IDENTITY).unwrap())
}

fn model_referencing(target: &str) -> (Document, ElementId) {
    let mut page = Page::new("model", PageType::Model).unwrap();
    let id = page.push_element(reference_to(target)).unwrap();
    let mut document = Document::new();
    document.push_page(page).unwrap();
    (document, id)
}

fn target_changes(events: &Receiver<DocumentEvent>, id: ElementId) -> Vec<TargetStatus> {
    events
        .try_iter()
        .filter_map(|event| match event {
            DocumentEvent::TargetChanged { element, status } if element == id => Some(status),
            _ => None,
        })
        .collect()
}

#[test]
fn adding_and_removing_a_local_target_fires_once_each() {
    let (document, id) = model_referencing("x.dat");
    let mut workspace = Workspace::new(document);
    let events = workspace.subscribe();
    assert_eq!(workspace.target_status(id), Some(TargetStatus::Missing));
    assert!(workspace.target(id).is_none());

    let page = workspace.add_page(Page::new("x", PageType::Part).unwrap()).unwrap();
    assert_eq!(target_changes(&events, id), vec![TargetStatus::Resolved]);
    assert_eq!(workspace.target(id).map(|target| target.id()), Some(page));

    workspace.remove_page(page).unwrap();
    assert_eq!(target_changes(&events, id), vec![TargetStatus::Missing]);
    assert!(workspace.target(id).is_none());
}

#[test]
fn local_target_shadows_library_and_reverts_to_it() {
    let source = MemorySource::new();
    source.insert("x.dat", PART);
    let library = Arc::new(Library::new(source, 8));
    let (document, id) = model_referencing("x.dat");
    let mut workspace = Workspace::with_library(document, Arc::clone(&library));
    let events = workspace.subscribe();
    assert!(workspace.target(id).is_some_and(|target| !target.is_local()));

    let page = workspace.add_page(Page::new("X", PageType::Part).unwrap()).unwrap();
    assert_eq!(target_changes(&events, id), vec![TargetStatus::Resolved]);
    assert!(workspace.target(id).is_some_and(|target| target.is_local()));

    workspace.remove_page(page).unwrap();
    assert_eq!(target_changes(&events, id), vec![TargetStatus::Resolved]);
    let target = workspace.target(id).unwrap();
    assert!(!target.is_local());
    assert!(target.is_frozen());
}

#[test]
fn unrelated_pages_do_not_disturb_references() {
    let (document, id) = model_referencing("x.dat");
    let mut workspace = Workspace::new(document);
    let events = workspace.subscribe();

    let other = workspace.add_page(Page::new("y", PageType::Part).unwrap()).unwrap();
    workspace.remove_page(other).unwrap();
    assert!(target_changes(&events, id).is_empty());
}

#[test]
fn one_transaction_fires_one_change_per_reference() {
    let (document, id) = model_referencing("x.dat");
    let mut workspace = Workspace::new(document);
    let events = workspace.subscribe();

    workspace.begin("两次添加").unwrap();
    let first = workspace.add_page(Page::new("x", PageType::Part).unwrap()).unwrap();
    workspace.remove_page(first).unwrap();
    workspace.add_page(Page::new("x", PageType::Part).unwrap()).unwrap();
    assert!(events.try_recv().is_err());
    workspace.commit().unwrap();

    assert_eq!(target_changes(&events, id), vec![TargetStatus::Resolved]);
}

#[test]
fn self_reference_is_circular_and_deletable() {
    let mut page = Page::new("a", PageType::Part).unwrap();
    let id = page.push_element(reference_to("a.dat")).unwrap();
    let mut document = Document::new();
    document.push_page(page).unwrap();
    let mut workspace = Workspace::new(document);

    assert_eq!(workspace.target_status(id), Some(TargetStatus::CircularReference));
    assert!(workspace.target(id).is_none());

    let problems = workspace.analyze(CodeStandard::Full);
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].kind, ProblemKind::TargetCircularReference);
    assert_eq!(problems[0].fixes, vec![Fix::Delete]);

    assert!(workspace.apply_fix(id, &Fix::Delete).unwrap());
    assert!(workspace.document().find_element(id).is_none());
    assert!(workspace.undo().unwrap());
    assert_eq!(workspace.target_status(id), Some(TargetStatus::CircularReference));
}

#[test]
fn mutual_references_are_circular_from_both_sides() {
    let mut a = Page::new("a", PageType::Part).unwrap();
    let to_b = a.push_element(reference_to("b.dat")).unwrap();
    let mut b = Page::new("b", PageType::Part).unwrap();
    let to_a = b.push_element(reference_to("a.dat")).unwrap();
    let mut workspace = Workspace::default();
    workspace.add_page(a).unwrap();
    assert_eq!(workspace.target_status(to_b), Some(TargetStatus::Missing));

    workspace.add_page(b).unwrap();
    assert_eq!(workspace.target_status(to_b), Some(TargetStatus::CircularReference));
    assert_eq!(workspace.target_status(to_a), Some(TargetStatus::CircularReference));
}

#[test]
fn library_changes_are_applied_on_the_document_thread() {
    let source = Arc::new(MemorySource::new());
    let library = Arc::new(Library::new(Arc::clone(&source), 8));
    let (document, id) = model_referencing("x.dat");
    let mut workspace = Workspace::with_library(document, Arc::clone(&library));
    let events = workspace.subscribe();
    assert_eq!(workspace.target_status(id), Some(TargetStatus::Missing));

    let watcher = {
        let source = Arc::clone(&source);
        let library = Arc::clone(&library);
        thread::spawn(move || {
            source.insert("x.dat", PART);
            library.notify("X.DAT", ChangeKind::Added);
        })
    };
    watcher.join().unwrap();

    assert_eq!(workspace.target_status(id), Some(TargetStatus::Missing));
    assert_eq!(workspace.process_library_events(), 1);
    assert_eq!(workspace.target_status(id), Some(TargetStatus::Resolved));
    assert_eq!(target_changes(&events, id), vec![TargetStatus::Resolved]);

    library.notify("unrelated.dat", ChangeKind::Updated);
    assert_eq!(workspace.process_library_events(), 0);
    assert_eq!(workspace.process_library_events(), 0);
}

#[test]
fn lagged_subscription_rechecks_every_reference() {
    let source = Arc::new(MemorySource::new());
    let library = Arc::new(Library::new(Arc::clone(&source), 1));
    let (document, id) = model_referencing("x.dat");
    let mut workspace = Workspace::with_library(document, Arc::clone(&library));

    library.notify("a.dat", ChangeKind::Updated);
    source.insert("x.dat", PART);
    library.notify("x.dat", ChangeKind::Added);

    assert_eq!(workspace.process_library_events(), 1);
    assert_eq!(workspace.target_status(id), Some(TargetStatus::Resolved));
}

#[test]
fn removed_library_files_become_missing() {
    let source = Arc::new(MemorySource::new());
    source.insert("x.dat", PART);
    let library = Arc::new(Library::new(Arc::clone(&source), 8));
    let (document, id) = model_referencing("x.dat");
    let mut workspace = Workspace::with_library(document, Arc::clone(&library));
    assert_eq!(workspace.target_status(id), Some(TargetStatus::Resolved));

    source.remove("x.dat");
    library.notify("x.dat", ChangeKind::Removed);
    assert_eq!(workspace.process_library_events(), 1);
    assert_eq!(workspace.target_status(id), Some(TargetStatus::Missing));
}

#[test]
fn undo_after_library_change_re_resolves() {
    let source = Arc::new(MemorySource::new());
    let library = Arc::new(Library::new(Arc::clone(&source), 8));
    let (document, id) = model_referencing("x.dat");
    let mut workspace = Workspace::with_library(document, Arc::clone(&library));

    let page = workspace.add_page(Page::new("x", PageType::Part).unwrap()).unwrap();
    assert!(workspace.target(id).is_some_and(|target| target.id() == page));

    source.insert("x.dat", PART);
    library.notify("x.dat", ChangeKind::Added);
    workspace.process_library_events();

    assert!(workspace.undo().unwrap());
    assert_eq!(workspace.target_status(id), Some(TargetStatus::Resolved));
    assert!(workspace.target(id).is_some_and(|target| !target.is_local()));
}
