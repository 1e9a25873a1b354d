use bus::{CaptureEvent, MutationData};
use core_types::{DocId, NodeId};
use dom::{Host, NodeHandle, NodeRef};
use record::{CaptureOptions, CaptureSession, ContextState, start_capture};
use std::sync::mpsc::{self, Receiver};

struct Fixture {
    host: Host,
    doc: DocId,
    session: CaptureSession,
    rx: Receiver<CaptureEvent>,
}

impl Fixture {
    fn new(build: impl FnOnce(&mut Host, DocId)) -> Self {
        let mut host = Host::new();
        let window = host.open_window("https://a.test/").unwrap();
        let doc = host.window_document(window).unwrap();
        build(&mut host, doc);
        let (tx, rx) = mpsc::channel();
        let session = start_capture(&mut host, doc, CaptureOptions::new(tx)).unwrap();
        rx.try_iter().count();
        Self {
            host,
            doc,
            session,
            rx,
        }
    }

    fn id(&self, node: NodeRef) -> Option<NodeId> {
        self.session.mirror().id_of(&NodeHandle::new(self.doc, node))
    }

    fn node(&self, path: &[usize]) -> NodeRef {
        let d = self.host.document(self.doc).unwrap();
        path.iter().fold(d.root(), |node, &i| d.children(node)[i])
    }

    fn tick(&mut self) -> Vec<MutationData> {
        self.session.tick(&mut self.host).unwrap();
        self.rx
            .try_iter()
            .filter_map(|event| event.as_mutation().cloned())
            .collect()
    }
}

fn two_lists(host: &mut Host, doc: DocId) {
    let d = host.document_mut(doc).unwrap();
    let body = d.create_element("body");
    d.append_child(d.root(), body).unwrap();
    for _ in 0..2 {
        let list = d.create_element("ul");
        d.append_child(body, list).unwrap();
        for label in ["a", "b"] {
            let item = d.create_element("li");
            let text = d.create_text(label);
            d.append_child(list, item).unwrap();
            d.append_child(item, text).unwrap();
        }
    }
}

#[test]
fn moving_between_parents_keeps_ids_and_emits_no_removal() {
    let mut f = Fixture::new(two_lists);
    let item = f.node(&[0, 0, 0]);
    let text = f.node(&[0, 0, 0, 0]);
    let target = f.node(&[0, 1]);
    let item_id = f.id(item).unwrap();
    let text_id = f.id(text).unwrap();

    f.host.document_mut(f.doc).unwrap().append_child(target, item).unwrap();
    let batches = f.tick();
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert!(batch.removes.is_empty());
    assert_eq!(batch.adds.len(), 1);
    assert_eq!(batch.adds[0].node.id, item_id);
    assert_eq!(batch.adds[0].parent_id, f.id(target).unwrap());
    assert_eq!(batch.adds[0].next_id, None);
    assert_eq!(batch.adds[0].node.children()[0].id, text_id);
    assert_eq!(f.id(text), Some(text_id));
}

#[test]
fn node_inserted_into_a_moved_node_is_described_with_it() {
    let mut f = Fixture::new(two_lists);
    let item = f.node(&[0, 0, 0]);
    let target = f.node(&[0, 1]);

    let d = f.host.document_mut(f.doc).unwrap();
    d.append_child(target, item).unwrap();
    let extra = d.create_element("b");
    d.append_child(item, extra).unwrap();
    let batches = f.tick();

    assert_eq!(batches[0].adds.len(), 1);
    let described: Vec<NodeId> = batches[0].adds[0]
        .node
        .children()
        .iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(described, vec![f.id(f.node(&[0, 1, 2, 0])).unwrap(), f.id(extra).unwrap()]);
}

#[test]
fn move_then_remove_of_the_old_parent_is_consistent() {
    let mut f = Fixture::new(two_lists);
    let old_parent = f.node(&[0, 0]);
    let item = f.node(&[0, 0, 1]);
    let target = f.node(&[0, 1]);
    let old_parent_id = f.id(old_parent).unwrap();
    let item_id = f.id(item).unwrap();

    let d = f.host.document_mut(f.doc).unwrap();
    d.insert_before(target, item, d.first_child(target)).unwrap();
    d.remove(old_parent).unwrap();
    let batches = f.tick();

    let batch = &batches[0];
    assert_eq!(batch.removes.len(), 1);
    assert_eq!(batch.removes[0].id, old_parent_id);
    assert_eq!(batch.adds.len(), 1);
    assert_eq!(batch.adds[0].node.id, item_id);
    assert_eq!(batch.adds[0].next_id, f.id(f.node(&[0, 0, 1])));
    assert_eq!(f.id(old_parent), None);
    assert_eq!(f.id(item), Some(item_id));
}

#[test]
fn moved_frame_keeps_its_nested_context() {
    let mut frame = None;
    let mut f = Fixture::new(|host, doc| {
        let d = host.document_mut(doc).unwrap();
        let body = d.create_element("body");
        let iframe = d.create_element("iframe");
        d.append_child(d.root(), body).unwrap();
        d.append_child(body, iframe).unwrap();
        let window = host.create_frame(doc, iframe, "https://a.test/inner").unwrap();
        host.finish_load(window).unwrap();
        frame = Some(iframe);
    });
    let Some(iframe) = frame else {
        panic!("fixture did not build a frame");
    };
    let handle = NodeHandle::new(f.doc, iframe);
    let before = f.session.frames().context(handle).unwrap();
    assert_eq!(before.state, ContextState::Attached);
    let nested_doc = f
        .host
        .window_document(before.window.unwrap())
        .unwrap();

    let body = f.node(&[0]);
    let d = f.host.document_mut(f.doc).unwrap();
    let wrapper = d.create_element("section");
    d.append_child(body, wrapper).unwrap();
    d.append_child(wrapper, iframe).unwrap();
    let batches = f.tick();

    assert_eq!(batches.len(), 1);
    assert!(!batches[0].is_attach_iframe);
    assert!(batches[0].removes.is_empty());
    assert_eq!(batches[0].adds.len(), 1);
    assert_eq!(batches[0].adds[0].node.children()[0].id, before.element_id);

    let after = f.session.frames().context(handle).unwrap();
    assert_eq!(after, before);
    assert_eq!(f.session.stats().buffers, 2);
    assert_eq!(f.host.document(nested_doc).unwrap().observer_count(), 1);
}

#[test]
fn frame_ignored_while_moving_drops_its_context() {
    let mut frame = None;
    let mut f = Fixture::new(|host, doc| {
        let d = host.document_mut(doc).unwrap();
        let body = d.create_element("body");
        let iframe = d.create_element("iframe");
        d.append_child(d.root(), body).unwrap();
        d.append_child(body, iframe).unwrap();
        let window = host.create_frame(doc, iframe, "https://a.test/inner").unwrap();
        host.finish_load(window).unwrap();
        frame = Some(iframe);
    });
    let Some(iframe) = frame else {
        panic!("fixture did not build a frame");
    };
    let handle = NodeHandle::new(f.doc, iframe);
    let before = f.session.frames().context(handle).unwrap();
    let nested_doc = f
        .host
        .window_document(before.window.unwrap())
        .unwrap();

    let body = f.node(&[0]);
    let d = f.host.document_mut(f.doc).unwrap();
    let wrapper = d.create_element("section");
    d.append_child(body, wrapper).unwrap();
    d.remove(iframe).unwrap();
    d.set_attribute(iframe, "class", "rr-ignore").unwrap();
    d.append_child(wrapper, iframe).unwrap();
    let batches = f.tick();

    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert!(batch.removes.iter().any(|r| r.id == before.element_id));
    assert!(batch.adds.iter().all(|a| a.node.id != before.element_id));
    assert_eq!(f.id(iframe), None);
    assert!(f.session.frames().context(handle).is_none());
    assert_eq!(f.session.stats().buffers, 1);
    assert_eq!(f.host.document(nested_doc).unwrap().observer_count(), 0);
}
