use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gaggle_collab::broadcast::BroadcastGroup;
use gaggle_collab::hub::RelayHub;
use gaggle_collab::presence::PresenceView;
use gaggle_collab::protocol::RelayEvent;
use gaggle_collab::replica::Replica;
use gaggle_core::{IdeaNode, NodeKind};

fn sync_event(count: usize) -> RelayEvent {
    let parent = IdeaNode::new("parent idea", NodeKind::UserAuthored, "bench");
    let mut nodes = vec![parent.clone()];
    for i in 0..count {
        nodes.push(
            IdeaNode::new(
                format!("Idea {i}: a few sentences of generated content about the parent."),
                NodeKind::AiGenerated,
                "bench",
            )
            .with_parent(Some(parent.id.clone())),
        );
    }
    RelayEvent::SyncIdeas {
        participant_id: "bench".into(),
        nodes,
        parent_id: Some(parent.id),
    }
}

fn bench_sync_encode(c: &mut Criterion) {
    let event = sync_event(5);

    c.bench_function("sync_ideas_encode_6_nodes", |b| {
        b.iter(|| black_box(black_box(&event).encode().unwrap()))
    });
}

fn bench_sync_decode(c: &mut Criterion) {
    let encoded = sync_event(5).encode().unwrap();

    c.bench_function("sync_ideas_decode_6_nodes", |b| {
        b.iter(|| black_box(RelayEvent::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_cursor_encode(c: &mut Criterion) {
    c.bench_function("cursor_move_encode", |b| {
        b.iter(|| {
            let event = RelayEvent::cursor("bench", black_box(120.5), black_box(80.25), "#ff8800");
            black_box(event.encode().unwrap());
        })
    });
}

fn bench_broadcast_1000_messages(c: &mut Criterion) {
    let frame = RelayEvent::cursor("sender", 1.0, 2.0, "red").encode().unwrap();

    c.bench_function("broadcast_1000_msgs_100_members", |b| {
        b.iter(|| {
            let group = BroadcastGroup::new(2048);
            let receivers: Vec<_> = (0..100)
                .map(|i| group.subscribe(format!("member{i}")))
                .collect();
            for _ in 0..1000 {
                group.send("sender", black_box(frame.clone()));
            }
            black_box(receivers);
        })
    });
}

fn bench_hub_relay(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let hub = RelayHub::new(1024);
    let members = rt.block_on(async {
        let mut members = Vec::new();
        for i in 0..10 {
            members.push(hub.join("board", &format!("member{i}")).await);
        }
        members
    });
    let event = RelayEvent::cursor("member0", 10.0, 10.0, "blue");
    let frame = event.encode().unwrap();

    c.bench_function("hub_relay_cursor_10_members", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(hub.relay("board", "member0", &event, frame.clone()).await);
            })
        })
    });
    drop(members);
}

fn bench_apply_remote(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let event = sync_event(5);

    // After the first pass every apply is a duplicate, the common case for
    // re-broadcast batches.
    c.bench_function("replica_apply_sync_6_nodes", |b| {
        let replica = Replica::new();
        b.iter(|| rt.block_on(async { black_box(replica.apply_remote(black_box(&event)).await) }))
    });
}

fn bench_presence_apply(c: &mut Criterion) {
    let events: Vec<RelayEvent> = (0..50)
        .map(|i| RelayEvent::cursor(format!("member{i}"), i as f32, i as f32, "green"))
        .collect();

    c.bench_function("presence_apply_50_cursors", |b| {
        b.iter(|| {
            let mut view = PresenceView::new();
            for event in &events {
                view.apply(black_box(event));
            }
            black_box(view.cursors().len());
        })
    });
}

criterion_group!(
    benches,
    bench_sync_encode,
    bench_sync_decode,
    bench_cursor_encode,
    bench_broadcast_1000_messages,
    bench_hub_relay,
    bench_apply_remote,
    bench_presence_apply,
);
criterion_main!(benches);
