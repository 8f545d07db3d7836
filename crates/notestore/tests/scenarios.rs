//! End-to-end behavior through `NotesApi`, run against both backends.

use std::sync::Arc;

use notestore::api::{NotesApi, StorageLocation};
use notestore::meta::MetaStore;
use notestore::model::{AttachmentData, AttachmentUpload, NewNote, NoteUpdate};
use notestore::store::NoteBackend;
use notestore::sync::SyncConfig;
use notestore::StoreError;
use tempfile::TempDir;

const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

struct Fixture {
    _dir: TempDir,
    api: NotesApi,
    id: String,
}

async fn fixture(location: impl FnOnce(&TempDir) -> StorageLocation) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let api = NotesApi::new(
        dir.path(),
        Arc::new(MetaStore::in_memory()),
        SyncConfig::default(),
    );
    let storage = api.create_storage("Test", location(&dir)).await.unwrap();
    let id = storage.id().to_string();
    Fixture { _dir: dir, api, id }
}

async fn both() -> Vec<Fixture> {
    vec![
        fixture(|_| StorageLocation::Replicated).await,
        fixture(|dir| StorageLocation::FileSystem(dir.path().join("notes"))).await,
    ]
}

async fn assert_consistent(f: &Fixture) {
    let violations = f.api.snapshot(&f.id).await.unwrap().verify();
    assert!(violations.is_empty(), "{:?}", violations);
}

#[tokio::test]
async fn create_in_nested_folder_creates_ancestors() {
    for f in both().await {
        let note = f
            .api
            .create_note(&f.id, NewNote::titled("x").in_folder("/proj/notes"))
            .await
            .unwrap();

        let backend = f.api.storage(&f.id).await.unwrap().backend().clone();
        assert!(backend.get_folder("/proj").await.unwrap().is_some());
        assert!(backend.get_folder("/proj/notes").await.unwrap().is_some());

        let snapshot = f.api.snapshot(&f.id).await.unwrap();
        assert!(snapshot
            .folder("/proj/notes")
            .unwrap()
            .note_id_set
            .contains(&note.id));
        assert!(snapshot.folder("/proj").unwrap().note_id_set.is_empty());
        assert_consistent(&f).await;
    }
}

#[tokio::test]
async fn rename_moves_subtree_and_notes() {
    for f in both().await {
        let note = f
            .api
            .create_note(&f.id, NewNote::titled("x").in_folder("/proj/notes"))
            .await
            .unwrap();

        f.api.rename_folder(&f.id, "/proj", "/project").await.unwrap();

        let snapshot = f.api.snapshot(&f.id).await.unwrap();
        assert!(snapshot
            .folder("/project/notes")
            .unwrap()
            .note_id_set
            .contains(&note.id));
        assert!(snapshot.folder("/proj").is_none());
        assert!(snapshot.folder("/proj/notes").is_none());
        assert_eq!(
            snapshot.note(&note.id).unwrap().folder_pathname,
            "/project/notes"
        );
        assert_consistent(&f).await;
    }
}

#[tokio::test]
async fn removing_a_tag_held_by_a_trashed_note() {
    for f in both().await {
        let note = f
            .api
            .create_note(&f.id, NewNote::titled("x").with_tags(["draft"]))
            .await
            .unwrap();
        f.api.trash_note(&f.id, &note.id).await.unwrap();

        f.api.remove_tag(&f.id, "draft").await.unwrap();

        let snapshot = f.api.snapshot(&f.id).await.unwrap();
        assert!(snapshot.tag("draft").is_none());
        assert!(snapshot.note(&note.id).unwrap().tags.is_empty());
        assert_consistent(&f).await;
    }
}

#[tokio::test]
async fn untrash_recreates_removed_folder() {
    for f in both().await {
        let note = f
            .api
            .create_note(&f.id, NewNote::titled("x").in_folder("/gone"))
            .await
            .unwrap();
        f.api.trash_note(&f.id, &note.id).await.unwrap();
        f.api.remove_folder(&f.id, "/gone").await.unwrap();
        assert!(f.api.snapshot(&f.id).await.unwrap().folder("/gone").is_none());

        let restored = f.api.untrash_note(&f.id, &note.id).await.unwrap();
        assert!(!restored.trashed);

        let snapshot = f.api.snapshot(&f.id).await.unwrap();
        assert!(snapshot
            .folder("/gone")
            .unwrap()
            .note_id_set
            .contains(&note.id));
        assert_consistent(&f).await;
    }
}

#[tokio::test]
async fn rename_into_own_subtree_is_rejected_without_change() {
    for f in both().await {
        f.api.create_folder(&f.id, "/a", None).await.unwrap();
        let before = f.api.export_docs(&f.id).await.unwrap().docs;
        let snapshot_before = f.api.snapshot(&f.id).await.unwrap();

        let err = f.api.rename_folder(&f.id, "/a", "/a/b").await.unwrap_err();
        assert!(err.is_unprocessable(), "{}", err);

        assert_eq!(f.api.export_docs(&f.id).await.unwrap().docs, before);
        assert!(Arc::ptr_eq(
            &snapshot_before,
            &f.api.snapshot(&f.id).await.unwrap()
        ));
    }
}

#[tokio::test]
async fn upsert_folder_without_props_is_idempotent() {
    for f in both().await {
        let first = f.api.create_folder(&f.id, "/x/y", None).await.unwrap();
        let second = f.api.create_folder(&f.id, "/x/y", None).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);

        let folders = f.api.export_docs(&f.id).await.unwrap().docs.folder_map;
        let mut pathnames: Vec<_> = folders.keys().cloned().collect();
        pathnames.sort();
        assert_eq!(pathnames, vec!["/", "/x", "/x/y"]);
    }
}

#[tokio::test]
async fn remove_folder_trashes_notes_in_subtree() {
    for f in both().await {
        let inside = f
            .api
            .create_note(&f.id, NewNote::titled("in").in_folder("/p/q"))
            .await
            .unwrap();
        let outside = f
            .api
            .create_note(&f.id, NewNote::titled("out").in_folder("/pp"))
            .await
            .unwrap();

        let outcome = f.api.remove_folder(&f.id, "/p").await.unwrap();
        assert_eq!(outcome.trashed_notes.len(), 1);
        assert_eq!(outcome.removed_pathnames, vec!["/p/q", "/p"]);

        let snapshot = f.api.snapshot(&f.id).await.unwrap();
        assert!(snapshot.note(&inside.id).unwrap().trashed);
        assert!(!snapshot.note(&outside.id).unwrap().trashed);
        assert!(snapshot.folder("/p").is_none());
        assert!(snapshot.folder("/pp").is_some());
        assert_consistent(&f).await;
    }
}

#[tokio::test]
async fn update_moves_note_between_folder_sets() {
    for f in both().await {
        let note = f
            .api
            .create_note(&f.id, NewNote::titled("x").in_folder("/a").with_tags(["t1"]))
            .await
            .unwrap();

        let update = NoteUpdate {
            folder_pathname: Some("/b/c".to_string()),
            tags: Some(vec!["t2".to_string()]),
            ..Default::default()
        };
        f.api.update_note(&f.id, &note.id, update).await.unwrap();

        let snapshot = f.api.snapshot(&f.id).await.unwrap();
        assert!(!snapshot.folder("/a").unwrap().note_id_set.contains(&note.id));
        assert!(snapshot.folder("/b/c").unwrap().note_id_set.contains(&note.id));
        assert!(snapshot.tag("t1").unwrap().note_id_set.is_empty());
        assert!(snapshot.tag("t2").unwrap().note_id_set.contains(&note.id));
        assert_consistent(&f).await;
    }
}

#[tokio::test]
async fn invalid_input_is_rejected_on_both_backends() {
    for f in both().await {
        let err = f
            .api
            .create_note(&f.id, NewNote::titled("x").in_folder("no-slash"))
            .await
            .unwrap_err();
        assert!(err.is_unprocessable());

        let err = f
            .api
            .create_note(&f.id, NewNote::titled("x").with_tags(["bad tag"]))
            .await
            .unwrap_err();
        assert!(err.is_unprocessable());

        let err = f.api.trash_note(&f.id, "note:missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert_consistent(&f).await;
    }
}

#[tokio::test]
async fn attachments_round_trip_through_the_index() {
    for f in both().await {
        let added = f
            .api
            .add_attachments(&f.id, vec![AttachmentUpload::new("pic.png", PNG.to_vec())])
            .await
            .unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].mime_type, "image/png");
        let name = added[0].name.clone();

        let snapshot = f.api.snapshot(&f.id).await.unwrap();
        let attachment = snapshot.attachment_map.get(&name).unwrap();
        match attachment.get_data().await.unwrap() {
            AttachmentData::Blob(bytes) => assert_eq!(bytes, PNG),
            AttachmentData::Uri(uri) => assert!(uri.ends_with(&name), "{}", uri),
        }

        f.api.remove_attachment(&f.id, &name).await.unwrap();
        let snapshot = f.api.snapshot(&f.id).await.unwrap();
        assert!(!snapshot.attachment_map.contains_key(&name));
    }
}

#[tokio::test]
async fn move_between_backends_keeps_content() {
    let dir = tempfile::tempdir().unwrap();
    let api = NotesApi::new(
        dir.path(),
        Arc::new(MetaStore::in_memory()),
        SyncConfig::default(),
    );
    let replicated = api
        .create_storage("R", StorageLocation::Replicated)
        .await
        .unwrap();
    let fs = api
        .create_storage("F", StorageLocation::FileSystem(dir.path().join("fs")))
        .await
        .unwrap();

    let note = api
        .create_note(
            replicated.id(),
            NewNote::titled("travel").with_content("body").with_tags(["t"]),
        )
        .await
        .unwrap();

    let moved = api
        .move_note_to_other_storage(replicated.id(), &note.id, fs.id(), "/inbox")
        .await
        .unwrap();
    assert_ne!(moved.id, note.id);
    assert_eq!(moved.content, "body");

    let source = api.snapshot(replicated.id()).await.unwrap();
    assert!(source.note(&note.id).is_none());
    assert!(source.tag("t").unwrap().note_id_set.is_empty());

    let target = api.snapshot(fs.id()).await.unwrap();
    assert!(target.folder("/inbox").unwrap().note_id_set.contains(&moved.id));
    assert!(target.tag("t").unwrap().note_id_set.contains(&moved.id));
    assert!(source.verify().is_empty());
    assert!(target.verify().is_empty());
}
