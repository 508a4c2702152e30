//! Live delivery integration tests: fan-out ordering, overflow isolation
//! and the publishes emitted by the calendar services.

use hearthbeat::calendar::{EntryPatch, EntryService, LensService, NewEntry, NewLens};
use hearthbeat::channels::Channel;
use hearthbeat::live::{LiveBroker, LiveEvent, LiveEventKind};
use hearthbeat::storage::{AuthStore, Member, MemoryStore, Project, User};
use std::sync::Arc;
use uuid::Uuid;

async fn seeded_member(store: &Arc<dyn AuthStore>) -> Member {
    let project = Project::new("Our family");
    store.insert_project(&project).await.unwrap();
    let user = User::new("A", "a@example.com", None);
    store.insert_user(&user).await.unwrap();
    let member = Member::new(project.id, user.id, "A");
    store.insert_member(&member).await.unwrap();
    member
}

fn entry_event(project_id: Uuid, n: u64) -> LiveEvent {
    LiveEvent::new(
        project_id,
        None,
        Uuid::new_v4(),
        LiveEventKind::EntryCreated(serde_json::json!({ "n": n })),
        chrono::Utc::now(),
    )
}

#[tokio::test]
async fn test_slow_subscriber_gets_resync_fast_one_gets_everything() {
    let capacity = 4;
    let broker = LiveBroker::new(capacity);
    broker.start_delivery();
    let project_id = Uuid::new_v4();
    let key = Channel::ProjectEvents(project_id).key();

    let fast = broker.subscribe(&key);
    let slow = broker.subscribe(&key);

    // The fast subscriber drains after every publish and sees every event
    // in order; the slow one never drains.
    let total = capacity + 3;
    for n in 0..total as u64 {
        broker.publish(&key, entry_event(project_id, n));
        let event = fast.recv().await;
        assert_eq!(
            event.kind,
            LiveEventKind::EntryCreated(serde_json::json!({ "n": n }))
        );
    }

    // The slow one overflowed: its buffer was reset to a single resync
    // marker plus whatever arrived after the reset.
    let mut drained = Vec::new();
    while let Some(event) = slow.try_recv() {
        drained.push(event.kind);
    }
    assert_eq!(
        drained
            .iter()
            .filter(|k| **k == LiveEventKind::ResyncRequired)
            .count(),
        1
    );
    assert!(drained.len() <= capacity);
}

#[tokio::test]
async fn test_channels_are_isolated() {
    let broker = LiveBroker::new(16);
    broker.start_delivery();
    let project_a = Uuid::new_v4();
    let project_b = Uuid::new_v4();

    let sub_a = broker.subscribe(&Channel::ProjectEvents(project_a).key());
    let sub_b = broker.subscribe(&Channel::ProjectEvents(project_b).key());

    broker.publish(&Channel::ProjectEvents(project_a).key(), entry_event(project_a, 1));

    let got = sub_a.recv().await;
    assert_eq!(got.project_id, project_a);
    assert!(sub_b.is_empty());
}

#[tokio::test]
async fn test_entry_lifecycle_publishes_in_order() {
    let store: Arc<dyn AuthStore> = Arc::new(MemoryStore::new());
    let broker = LiveBroker::new(32);
    broker.start_delivery();
    let member = seeded_member(&store).await;
    let entries = EntryService::new(Arc::clone(&store), Arc::clone(&broker));

    let feed = broker.subscribe(&Channel::ProjectEvents(member.project_id).key());

    let view = entries
        .create(
            &member,
            NewEntry {
                title: "Dentist".into(),
                lens_id: None,
            },
        )
        .await
        .unwrap();
    entries
        .update(
            &member,
            view.id,
            EntryPatch {
                title: Some("Dentist (moved)".into()),
            },
        )
        .await
        .unwrap();
    entries.delete(&member, view.id).await.unwrap();

    let first = feed.recv().await;
    let second = feed.recv().await;
    let third = feed.recv().await;
    assert!(matches!(first.kind, LiveEventKind::EntryCreated(_)));
    assert!(matches!(second.kind, LiveEventKind::EntryUpdated(_)));
    assert!(matches!(third.kind, LiveEventKind::EntryDeleted));
    assert!(third.updated_at >= first.updated_at);
}

#[tokio::test]
async fn test_restricted_lens_connection_denied_at_setup() {
    let store: Arc<dyn AuthStore> = Arc::new(MemoryStore::new());
    let broker = LiveBroker::new(32);
    broker.start_delivery();
    let creator = seeded_member(&store).await;
    let user_b = User::new("B", "b@example.com", None);
    store.insert_user(&user_b).await.unwrap();
    let member_b = Member::new(creator.project_id, user_b.id, "B");
    store.insert_member(&member_b).await.unwrap();

    let lenses = LensService::new(Arc::clone(&store), Arc::clone(&broker));
    let resolver = hearthbeat::auth::AccessResolver::new(Arc::clone(&store));

    // A lens restricted to its creator only.
    let lens = lenses
        .create(
            &creator,
            NewLens {
                name: "Just me".into(),
                member_ids: vec![creator.id],
                is_default: false,
            },
        )
        .await
        .unwrap();

    // B is a project member but not in the lens: the channel check that
    // gates connection setup denies the subscription.
    let channel = Channel::Calendar(lens.id);
    assert!(resolver.can_access_channel(&creator, &channel).await.unwrap());
    assert!(!resolver.can_access_channel(&member_b, &channel).await.unwrap());
}

#[tokio::test]
async fn test_lens_deletion_announced_on_meta_and_calendar_channels() {
    let store: Arc<dyn AuthStore> = Arc::new(MemoryStore::new());
    let broker = LiveBroker::new(32);
    broker.start_delivery();
    let member = seeded_member(&store).await;
    let lenses = LensService::new(Arc::clone(&store), Arc::clone(&broker));

    let lens = lenses
        .create(
            &member,
            NewLens {
                name: "Kids".into(),
                member_ids: vec![member.id],
                is_default: false,
            },
        )
        .await
        .unwrap();

    let meta = broker.subscribe(&Channel::ProjectMeta(member.project_id).key());
    let calendar = broker.subscribe(&Channel::Calendar(lens.id).key());

    lenses.delete(&member, lens.id).await.unwrap();

    let on_meta = meta.recv().await;
    let on_calendar = calendar.recv().await;
    assert!(matches!(on_meta.kind, LiveEventKind::CalendarDeleted(_)));
    assert!(matches!(on_calendar.kind, LiveEventKind::CalendarDeleted(_)));
    assert_eq!(on_meta.entity_id, lens.id);
}
