//! Source document -> capture stream -> replica, checked after every tick
//! against a fresh serialization of the source.

use domtape::bus::{CaptureEvent, NullSink};
use domtape::core_types::{DocId, NodeId, WindowId};
use domtape::dom::{Host, NodeHandle, NodeKind, NodeRef, traverse};
use domtape::record::{CaptureOptions, CaptureSession, start_capture};
use domtape::replay::Replica;
use domtape::snapshot::{
    Mirror, NoHooks, NodePolicy, SerializeOptions, SerializedNode, SerializedNodeWithId,
    serialize_node_with_id,
};
use std::sync::mpsc::{self, Receiver};

/// xorshift64; deterministic scripts without an rng dependency.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }

    fn pick<T: Copy>(&mut self, items: &[T]) -> Option<T> {
        if items.is_empty() {
            None
        } else {
            Some(items[self.below(items.len())])
        }
    }
}

/// The source as a fresh serialization using the session's ids. Fails when
/// the source holds a visible node the stream never described.
fn expected(
    host: &Host,
    doc: DocId,
    mirror: &Mirror<NodeHandle>,
    root_id: Option<NodeId>,
) -> SerializedNodeWithId {
    let mut mirror = mirror.clone();
    let before = mirror.len();
    let policy = NodePolicy::default();
    let document = host.document(doc).unwrap();
    let options = SerializeOptions {
        policy: &policy,
        root_id,
    };
    let node = serialize_node_with_id(document, document.root(), &mut mirror, &options, &mut NoHooks)
        .unwrap()
        .unwrap();
    assert_eq!(mirror.len(), before, "source holds undescribed nodes");
    node
}

/// Same tree with every id zeroed, for streams that renumber.
fn shape(node: &SerializedNodeWithId) -> SerializedNodeWithId {
    let mut node = node.clone();
    node.visit_mut(&mut |n| {
        n.id = NodeId(0);
        n.root_id = None;
    });
    node
}

fn apply_all(replica: &mut Replica, rx: &Receiver<CaptureEvent>) {
    for event in rx.try_iter() {
        replica.apply(&event).unwrap();
    }
}

fn page(host: &mut Host) -> (WindowId, DocId, NodeRef) {
    let window = host.open_window("https://a.test/app/index.html").unwrap();
    let doc = host.window_document(window).unwrap();
    let d = host.document_mut(doc).unwrap();
    let doctype = d.create_doctype("html", "", "");
    let html = d.create_element("html");
    let body = d.create_element("body");
    d.append_child(d.root(), doctype).unwrap();
    d.append_child(d.root(), html).unwrap();
    d.append_child(html, body).unwrap();
    let img = d.create_element_with("img", &[("src", "img/logo.png"), ("alt", "logo")]);
    d.append_child(body, img).unwrap();
    let style = d.create_element("style");
    let css = d.create_text("body { background: url(bg.png) } a:hover { color: red }");
    d.append_child(body, style).unwrap();
    d.append_child(style, css).unwrap();
    (window, doc, body)
}

/// One random edit somewhere below `body`.
fn mutate(host: &mut Host, doc: DocId, body: NodeRef, rng: &mut Rng, detached: &mut Vec<NodeRef>) {
    let d = host.document(doc).unwrap();
    let below: Vec<NodeRef> = traverse::descendants(d, body).skip(1).collect();
    let elements: Vec<NodeRef> = traverse::descendants(d, body)
        .filter(|n| d.kind(*n) == Some(NodeKind::Element))
        .filter(|n| !matches!(d.tag_name(*n), Some("style" | "img")))
        .collect();
    let texts: Vec<NodeRef> = below
        .iter()
        .copied()
        .filter(|n| d.kind(*n) == Some(NodeKind::Text))
        .filter(|n| d.parent(*n).and_then(|p| d.tag_name(p)) != Some("style"))
        .collect();
    detached.retain(|n| d.is_live(*n) && d.parent(*n).is_none());

    match rng.below(8) {
        0 | 1 => {
            let Some(parent) = rng.pick(&elements) else { return };
            let tag = ["div", "span", "p", "section"][rng.below(4)];
            let class = ["", "", "", "rr-block", "rr-ignore", "rr-mask"][rng.below(6)];
            let label = format!("t{}", rng.below(1000));
            let d = host.document_mut(doc).unwrap();
            let node = if class.is_empty() {
                d.create_element(tag)
            } else {
                d.create_element_with(tag, &[("class", class)])
            };
            let text = d.create_text(&label);
            d.append_child(node, text).unwrap();
            let before = rng.pick(d.children(parent));
            d.insert_before(parent, node, before).unwrap();
        }
        2 => {
            let Some(node) = rng.pick(&below) else { return };
            host.document_mut(doc).unwrap().remove(node).unwrap();
            detached.push(node);
        }
        3 => {
            let Some(node) = rng.pick(&below) else { return };
            let d = host.document(doc).unwrap();
            let targets: Vec<NodeRef> = elements
                .iter()
                .copied()
                .filter(|t| !d.is_inclusive_ancestor(node, *t))
                .collect();
            let Some(parent) = rng.pick(&targets) else { return };
            let siblings: Vec<NodeRef> = d
                .children(parent)
                .iter()
                .copied()
                .filter(|s| *s != node)
                .collect();
            let before = rng.pick(&siblings);
            host.document_mut(doc)
                .unwrap()
                .insert_before(parent, node, before)
                .unwrap();
        }
        4 => {
            let Some(node) = rng.pick(&texts) else { return };
            let value = format!("v{}", rng.below(1000));
            host.document_mut(doc).unwrap().set_text(node, &value).unwrap();
        }
        5 => {
            let Some(node) = rng.pick(&elements) else { return };
            let d = host.document_mut(doc).unwrap();
            if rng.below(3) == 0 {
                d.remove_attribute(node, "title").unwrap();
            } else {
                let value = format!("n{}", rng.below(100));
                d.set_attribute(node, "title", &value).unwrap();
            }
        }
        6 => {
            let Some(node) = rng.pick(detached.as_slice()) else { return };
            let Some(parent) = rng.pick(&elements) else { return };
            host.document_mut(doc).unwrap().append_child(parent, node).unwrap();
        }
        _ => {
            let Some(node) = rng.pick(detached.as_slice()) else { return };
            host.destroy(doc, node).unwrap();
        }
    }
}

fn capture(host: &mut Host, doc: DocId) -> (CaptureSession, Receiver<CaptureEvent>) {
    let (tx, rx) = mpsc::channel();
    let session = start_capture(host, doc, CaptureOptions::new(tx)).unwrap();
    (session, rx)
}

#[test]
fn random_edit_scripts_converge_after_every_tick() {
    for seed in [0x9e37_79b9_7f4a_7c15_u64, 42, 7, 0xdead_beef] {
        let mut host = Host::new();
        let (_, doc, body) = page(&mut host);
        let (mut session, rx) = capture(&mut host, doc);
        let mut replica = Replica::new();
        apply_all(&mut replica, &rx);
        assert_eq!(replica.materialize().unwrap(), expected(&host, doc, session.mirror(), None));

        let mut rng = Rng(seed);
        let mut detached = Vec::new();
        for round in 0..60 {
            for _ in 0..rng.below(6) + 1 {
                mutate(&mut host, doc, body, &mut rng, &mut detached);
            }
            session.tick(&mut host).unwrap();
            apply_all(&mut replica, &rx);
            assert_eq!(
                replica.materialize().unwrap(),
                expected(&host, doc, session.mirror(), None),
                "seed {seed:#x}, round {round}"
            );
            assert_eq!(replica.len(), session.mirror().len(), "seed {seed:#x}, round {round}");
        }
        session.stop(&mut host);
    }
}

#[test]
fn replaying_from_json_matches_replaying_in_memory() {
    let mut host = Host::new();
    let (_, doc, body) = page(&mut host);
    let (mut session, rx) = capture(&mut host, doc);
    let mut lines = Vec::new();
    let mut direct = Replica::new();

    let mut rng = Rng(3);
    let mut detached = Vec::new();
    let mut record = |rx: &Receiver<CaptureEvent>, direct: &mut Replica| {
        for event in rx.try_iter() {
            direct.apply(&event).unwrap();
            lines.push(serde_json::to_string(&event).unwrap());
        }
    };
    record(&rx, &mut direct);
    for _ in 0..20 {
        mutate(&mut host, doc, body, &mut rng, &mut detached);
        session.tick(&mut host).unwrap();
        record(&rx, &mut direct);
    }
    session.stop(&mut host);

    let mut decoded = Replica::new();
    for line in &lines {
        let event: CaptureEvent = serde_json::from_str(line).unwrap();
        decoded.apply(&event).unwrap();
    }
    assert_eq!(decoded.materialize().unwrap(), direct.materialize().unwrap());
    assert_eq!(decoded.href(), Some("https://a.test/app/index.html"));
}

#[test]
fn recorded_urls_are_absolute_and_styles_adapt_on_render() {
    let mut host = Host::new();
    let (_, doc, _) = page(&mut host);
    let (mut session, rx) = capture(&mut host, doc);
    let mut replica = Replica::new();
    apply_all(&mut replica, &rx);

    let tree = replica.materialize().unwrap();
    let mut srcs = Vec::new();
    let mut styles = Vec::new();
    tree.visit(&mut |n| match &n.node {
        SerializedNode::Element { attributes, .. } => srcs.extend(attributes.get("src").cloned()),
        SerializedNode::Text {
            text_content,
            is_style: true,
        } => styles.push(text_content.clone()),
        _ => {}
    });
    assert_eq!(srcs, vec!["https://a.test/app/img/logo.png".to_string()]);
    assert_eq!(
        styles,
        vec!["body { background: url(https://a.test/app/bg.png) } a:hover { color: red }".to_string()]
    );

    let root = replica.root().unwrap();
    let rendered = replica.render(root).unwrap();
    let mut rendered_styles = Vec::new();
    rendered.visit(&mut |n| {
        if let SerializedNode::Text {
            text_content,
            is_style: true,
        } = &n.node
        {
            rendered_styles.push(text_content.clone());
        }
    });
    assert!(rendered_styles[0].contains("a:hover,\na.\\:hover { color: red }"));
    session.stop(&mut host);
}

#[test]
fn nested_same_origin_document_converges() {
    let mut host = Host::new();
    let (_, doc, body) = page(&mut host);
    let d = host.document_mut(doc).unwrap();
    let iframe = d.create_element("iframe");
    d.append_child(body, iframe).unwrap();
    let window = host.create_frame(doc, iframe, "https://a.test/app/frame.html").unwrap();
    let inner = host.window_document(window).unwrap();
    let d = host.document_mut(inner).unwrap();
    let inner_body = d.create_element("body");
    d.append_child(d.root(), inner_body).unwrap();
    host.finish_load(window).unwrap();

    let (mut session, rx) = capture(&mut host, doc);
    let mut replica = Replica::new();
    apply_all(&mut replica, &rx);
    let frame_id = session
        .mirror()
        .id_of(&NodeHandle::new(doc, iframe))
        .unwrap();

    let mut rng = Rng(11);
    let mut detached = Vec::new();
    for round in 0..30 {
        mutate(&mut host, inner, inner_body, &mut rng, &mut detached);
        session.tick(&mut host).unwrap();
        apply_all(&mut replica, &rx);

        let root_id = replica.content_of(frame_id).unwrap();
        assert_eq!(
            replica.materialize_from(root_id).unwrap(),
            expected(&host, inner, session.mirror(), Some(root_id)),
            "round {round}"
        );
    }

    // moving the frame keeps the nested document attached
    let d = host.document_mut(doc).unwrap();
    let wrapper = d.create_element("div");
    d.append_child(body, wrapper).unwrap();
    d.append_child(wrapper, iframe).unwrap();
    session.tick(&mut host).unwrap();
    apply_all(&mut replica, &rx);
    assert_eq!(replica.parent_of(frame_id), session.mirror().id_of(&NodeHandle::new(doc, wrapper)));
    assert!(replica.content_of(frame_id).is_some());
    assert_eq!(replica.materialize().unwrap(), expected(&host, doc, session.mirror(), None));
    session.stop(&mut host);
}

#[test]
fn cross_origin_document_converges_through_the_parent() {
    let mut host = Host::new();
    let (top_window, doc, body) = page(&mut host);
    let d = host.document_mut(doc).unwrap();
    let iframe = d.create_element("iframe");
    d.append_child(body, iframe).unwrap();
    let window = host.create_frame(doc, iframe, "https://b.test/widget").unwrap();
    let remote = host.window_document(window).unwrap();
    let d = host.document_mut(remote).unwrap();
    let remote_body = d.create_element("body");
    d.append_child(d.root(), remote_body).unwrap();
    host.finish_load(window).unwrap();

    let mut child = start_capture(
        &mut host,
        remote,
        CaptureOptions::cross_origin_child(top_window),
    )
    .unwrap();
    let (tx, rx) = mpsc::channel();
    let mut parent = start_capture(
        &mut host,
        doc,
        CaptureOptions::new(tx).record_cross_origin_iframes(true),
    )
    .unwrap();
    let mut replica = Replica::new();
    let frame_id = parent
        .mirror()
        .id_of(&NodeHandle::new(doc, iframe))
        .unwrap();

    let mut rng = Rng(5);
    let mut detached = Vec::new();
    for round in 0..30 {
        if round > 0 {
            mutate(&mut host, remote, remote_body, &mut rng, &mut detached);
        }
        child.tick(&mut host).unwrap();
        parent.tick(&mut host).unwrap();
        apply_all(&mut replica, &rx);

        let root_id = replica.content_of(frame_id).unwrap();
        assert_eq!(
            shape(&replica.materialize_from(root_id).unwrap()),
            shape(&expected(&host, remote, child.mirror(), None)),
            "round {round}"
        );
    }
    child.stop(&mut host);
    parent.stop(&mut host);
    assert_eq!(host.message_listener_count(window), 0);
    assert_eq!(host.message_listener_count(top_window), 0);
}

#[test]
fn null_sink_session_still_tracks_ids() {
    let mut host = Host::new();
    let (_, doc, body) = page(&mut host);
    let mut session = start_capture(&mut host, doc, CaptureOptions::new(NullSink)).unwrap();
    let d = host.document_mut(doc).unwrap();
    let p = d.create_element("p");
    d.append_child(body, p).unwrap();
    session.tick(&mut host).unwrap();
    assert!(session.mirror().id_of(&NodeHandle::new(doc, p)).is_some());
    session.stop(&mut host);
}
