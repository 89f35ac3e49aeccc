//! Connector integration tests
//!
//! Two or three in-memory stores stand in for independent replicas. An offline
//! store models a replica that cannot be reached.

use bytes::Bytes;
use hp_core::{
    Connector, ConnectorConfig, DocId, Error, PreRevisionPolicy, RevId, Store, StoreBackendConfig,
    StoreConfig, StoreId,
};
use tempfile::TempDir;

async fn connector(ids: &[&str]) -> Connector {
    with_policy(ids, PreRevisionPolicy::Coexist).await
}

async fn with_policy(ids: &[&str], policy: PreRevisionPolicy) -> Connector {
    let c = Connector::with_policy(policy);
    for id in ids {
        c.add_store(Store::in_memory(*id)).await.unwrap();
    }
    c
}

fn ids(ids: &[&str]) -> Vec<StoreId> {
    ids.iter().map(|id| StoreId::new(*id)).collect()
}

async fn create_doc(c: &Connector, stores: &[&str], content: &[u8]) -> (DocId, RevId) {
    let mut w = c
        .create("test.format.foo", "test.ignore", &ids(stores))
        .await
        .unwrap();
    w.write_all("FILE", content).unwrap();
    let rev = w.commit().await.unwrap();
    (w.doc(), rev)
}

async fn update_doc(c: &Connector, doc: DocId, base: RevId, stores: &[&str], content: &[u8]) -> RevId {
    let mut w = c.update(doc, base, None, Some(&ids(stores))).await.unwrap();
    w.write_all("FILE", content).unwrap();
    w.commit().await.unwrap()
}

async fn suspend_doc(c: &Connector, doc: DocId, base: RevId, content: &[u8]) -> RevId {
    let mut w = c.update(doc, base, None, None).await.unwrap();
    w.write_all("FILE", content).unwrap();
    w.suspend().await.unwrap()
}

// ---- creator and type codes ----

#[tokio::test]
async fn test_create_records_type_and_creator() {
    let c = connector(&["rem1"]).await;
    let before = chrono::Utc::now().timestamp();
    let (_, rev) = create_doc(&c, &["rem1"], b"Hail to the king, baby!").await;

    let s = c.stat(rev).await.unwrap();
    assert_eq!(s.type_code(), "test.format.foo");
    assert_eq!(s.creator(), "test.ignore");
    assert!(s.parents().is_empty());
    assert_eq!(s.parts(), vec!["FILE"]);
    assert_eq!(s.size("FILE"), Some(23));
    assert_eq!(s.stores(), ids(&["rem1"]).as_slice());
    assert!(s.mtime().timestamp() >= before);
}

#[tokio::test]
async fn test_fork_keeps_type() {
    let c = connector(&["rem1"]).await;
    let (doc, rev) = create_doc(&c, &["rem1"], b"source").await;

    let mut w = c.fork(rev, "test.baz").await.unwrap();
    assert_ne!(w.doc(), doc);
    assert_eq!(w.read_all("FILE").unwrap(), b"source");
    w.write_all("FILE", b"forked").unwrap();
    let forked = w.commit().await.unwrap();

    let s = c.stat(forked).await.unwrap();
    assert_eq!(s.type_code(), "test.format.foo");
    assert_eq!(s.creator(), "test.baz");
    assert_eq!(s.parents(), &[rev]);
}

#[tokio::test]
async fn test_fork_change_type() {
    let c = connector(&["rem1"]).await;
    let (_, rev) = create_doc(&c, &["rem1"], b"source").await;

    let mut w = c.fork(rev, "test.baz").await.unwrap();
    w.set_type("test.format.bar").unwrap();
    let forked = w.commit().await.unwrap();
    assert_eq!(c.stat(forked).await.unwrap().type_code(), "test.format.bar");
}

#[tokio::test]
async fn test_update_keeps_type_and_creator() {
    let c = connector(&["rem1"]).await;
    let (doc, rev) = create_doc(&c, &["rem1"], b"one").await;

    let mut w = c.update(doc, rev, None, None).await.unwrap();
    assert_eq!(w.get_type(), "test.format.foo");
    assert_eq!(w.get_creator(), "test.ignore");
    w.write_all("FILE", b"two").unwrap();
    let next = w.commit().await.unwrap();

    let s = c.stat(next).await.unwrap();
    assert_eq!(s.type_code(), "test.format.foo");
    assert_eq!(s.creator(), "test.ignore");
    assert_eq!(s.parents(), &[rev]);
}

#[tokio::test]
async fn test_update_change_creator_and_type() {
    let c = connector(&["rem1"]).await;
    let (doc, rev) = create_doc(&c, &["rem1"], b"one").await;

    let mut w = c.update(doc, rev, Some("test.baz"), None).await.unwrap();
    w.set_type("test.format.bar").unwrap();
    w.write_all("FILE", b"two").unwrap();
    let next = w.commit().await.unwrap();

    let s = c.stat(next).await.unwrap();
    assert_eq!(s.creator(), "test.baz");
    assert_eq!(s.type_code(), "test.format.bar");
}

// ---- sync ----

#[tokio::test]
async fn test_sync_already_same() {
    let c = connector(&["rem1", "rem2"]).await;
    let (doc, rev) = create_doc(&c, &["rem1", "rem2"], b"same").await;

    assert_eq!(c.sync(doc, None).await.unwrap(), rev);
    assert_eq!(c.stat(rev).await.unwrap().stores(), ids(&["rem1", "rem2"]).as_slice());
}

#[tokio::test]
async fn test_sync_fast_forward() {
    let c = connector(&["rem1", "rem2"]).await;
    let (doc, rev) = create_doc(&c, &["rem1", "rem2"], b"one").await;
    let newer = update_doc(&c, doc, rev, &["rem1"], b"two").await;

    let l = c.lookup(doc).await.unwrap();
    assert_eq!(l.rev(&StoreId::new("rem1")), Some(newer));
    assert_eq!(l.rev(&StoreId::new("rem2")), Some(rev));

    assert_eq!(c.sync(doc, None).await.unwrap(), newer);
    let l = c.lookup(doc).await.unwrap();
    assert_eq!(l.revs(), vec![newer]);
    assert_eq!(l.rev(&StoreId::new("rem2")), Some(newer));
    assert_eq!(c.stat(newer).await.unwrap().stores(), ids(&["rem1", "rem2"]).as_slice());
}

#[tokio::test]
async fn test_sync_conflict() {
    let c = connector(&["rem1", "rem2"]).await;
    let (doc, rev) = create_doc(&c, &["rem1", "rem2"], b"base").await;
    let left = update_doc(&c, doc, rev, &["rem1"], b"left").await;
    let right = update_doc(&c, doc, rev, &["rem2"], b"right").await;
    assert_ne!(left, right);

    match c.sync(doc, None).await {
        Err(Error::Conflict(heads)) => {
            assert_eq!(heads.len(), 2);
            assert!(heads.contains(&left) && heads.contains(&right));
        }
        other => panic!("expected conflict, got {:?}", other.map(|id| id.to_hex())),
    }

    let l = c.lookup(doc).await.unwrap();
    assert_eq!(l.revs().len(), 2);
    assert!(l.revs().contains(&left) && l.revs().contains(&right));
    assert_eq!(l.rev(&StoreId::new("rem1")), Some(left));
    assert_eq!(l.rev(&StoreId::new("rem2")), Some(right));
}

#[tokio::test]
async fn test_sync_merge() {
    let c = connector(&["rem1", "rem2"]).await;
    let (doc, rev) = create_doc(&c, &["rem1", "rem2"], b"base").await;
    let left = update_doc(&c, doc, rev, &["rem1"], b"left").await;
    let right = update_doc(&c, doc, rev, &["rem2"], b"right").await;
    assert!(matches!(c.sync(doc, None).await, Err(Error::Conflict(_))));

    let mut w = c
        .update(doc, left, None, Some(&ids(&["rem1", "rem2"])))
        .await
        .unwrap();
    w.set_parents(vec![left, right]).await.unwrap();
    w.write_all("FILE", b"merged").unwrap();
    let merge = w.commit().await.unwrap();

    assert_eq!(c.sync(doc, None).await.unwrap(), merge);
    let l = c.lookup(doc).await.unwrap();
    assert_eq!(l.revs(), vec![merge]);

    let both = ids(&["rem1", "rem2"]);
    for id in [merge, left, right] {
        assert_eq!(c.stat(id).await.unwrap().stores(), both.as_slice());
    }
    assert_eq!(c.stat(merge).await.unwrap().parents(), &[left, right]);
}

#[tokio::test]
async fn test_sync_is_idempotent() {
    let c = connector(&["rem1", "rem2"]).await;
    let (doc, rev) = create_doc(&c, &["rem1", "rem2"], b"one").await;
    let newer = update_doc(&c, doc, rev, &["rem1"], b"two").await;

    assert_eq!(c.sync(doc, None).await.unwrap(), newer);
    let before = c.lookup(doc).await.unwrap();
    assert_eq!(c.sync(doc, None).await.unwrap(), newer);
    assert_eq!(c.lookup(doc).await.unwrap(), before);
}

#[tokio::test]
async fn test_sync_to_new_store() {
    let c = connector(&["rem1", "rem2"]).await;
    let (doc, rev) = create_doc(&c, &["rem1"], b"one").await;

    assert_eq!(c.sync(doc, Some(&ids(&["rem1", "rem2"]))).await.unwrap(), rev);
    assert_eq!(
        c.lookup(doc).await.unwrap().stores(),
        ids(&["rem1", "rem2"])
    );
}

#[tokio::test]
async fn test_sync_unknown_document() {
    let c = connector(&["rem1"]).await;
    assert!(matches!(
        c.sync(DocId::generate(), None).await,
        Err(Error::NotFound(_))
    ));
}

// ---- pre-revisions ----

#[tokio::test]
async fn test_suspend() {
    let c = connector(&["rem1"]).await;
    let (doc, rev) = create_doc(&c, &["rem1"], b"committed").await;
    let pre = suspend_doc(&c, doc, rev, b"draft").await;

    let l = c.lookup(doc).await.unwrap();
    assert_eq!(l.revs(), vec![rev]);
    assert_eq!(l.pre_revs(), vec![pre]);
    assert_eq!(c.stat(pre).await.unwrap().parents(), &[rev]);
}

#[tokio::test]
async fn test_suspend_multi_coexist() {
    let c = connector(&["rem1"]).await;
    let (doc, rev) = create_doc(&c, &["rem1"], b"committed").await;
    let first = suspend_doc(&c, doc, rev, b"draft one").await;
    let second = suspend_doc(&c, doc, rev, b"draft two").await;

    let l = c.lookup(doc).await.unwrap();
    assert_eq!(l.revs(), vec![rev]);
    assert_eq!(l.pre_revs(), vec![first, second]);
}

#[tokio::test]
async fn test_suspend_multi_replace_same_parent() {
    let c = with_policy(&["rem1"], PreRevisionPolicy::ReplaceSameParent).await;
    let (doc, rev) = create_doc(&c, &["rem1"], b"committed").await;
    suspend_doc(&c, doc, rev, b"draft one").await;
    let second = suspend_doc(&c, doc, rev, b"draft two").await;

    assert_eq!(c.lookup(doc).await.unwrap().pre_revs(), vec![second]);
}

#[tokio::test]
async fn test_pre_revisions_outlive_later_commits() {
    let c = connector(&["rem1"]).await;
    let (doc, first) = create_doc(&c, &["rem1"], b"first").await;
    let early = suspend_doc(&c, doc, first, b"draft on first").await;

    let second = update_doc(&c, doc, first, &["rem1"], b"second").await;
    let late = suspend_doc(&c, doc, second, b"draft on second").await;

    let l = c.lookup(doc).await.unwrap();
    assert_eq!(l.revs(), vec![second]);
    assert_eq!(l.pre_revs(), vec![early, late]);
    assert_eq!(c.stat(early).await.unwrap().parents(), &[first]);
    assert_eq!(c.stat(late).await.unwrap().parents(), &[second]);
}

#[tokio::test]
async fn test_resume_wrong() {
    let c = connector(&["rem1"]).await;
    let (doc, rev) = create_doc(&c, &["rem1"], b"committed").await;
    assert!(matches!(c.resume(doc, rev).await, Err(Error::InvalidState(_))));
}

#[tokio::test]
async fn test_resume_abort() {
    let c = connector(&["rem1"]).await;
    let (doc, rev) = create_doc(&c, &["rem1"], b"committed").await;
    let pre = suspend_doc(&c, doc, rev, b"draft").await;

    let mut w = c.resume(doc, pre).await.unwrap();
    assert_eq!(w.read_all("FILE").unwrap(), b"draft");
    w.write_all("FILE", b"discarded").unwrap();
    w.abort().unwrap();

    // released without finalizing
    {
        let mut w = c.resume(doc, pre).await.unwrap();
        w.write_all("FILE", b"also discarded").unwrap();
    }

    let l = c.lookup(doc).await.unwrap();
    assert_eq!(l.revs(), vec![rev]);
    assert_eq!(l.pre_revs(), vec![pre]);
    assert_eq!(
        c.peek(pre).await.unwrap().read_all("FILE").await.unwrap(),
        Bytes::from_static(b"draft")
    );
}

#[tokio::test]
async fn test_resume_commit() {
    let c = connector(&["rem1"]).await;
    let (doc, rev) = create_doc(&c, &["rem1"], b"committed").await;
    let pre = suspend_doc(&c, doc, rev, b"draft").await;

    let mut w = c.resume(doc, pre).await.unwrap();
    w.write("FILE", b" finished").unwrap();
    let done = w.commit().await.unwrap();

    let l = c.lookup(doc).await.unwrap();
    assert_eq!(l.revs(), vec![done]);
    assert!(l.pre_revs().is_empty());

    let s = c.stat(done).await.unwrap();
    assert_eq!(s.parents(), &[rev]);
    assert_eq!(
        c.peek(done).await.unwrap().read_all("FILE").await.unwrap(),
        Bytes::from_static(b"draft finished")
    );
}

#[tokio::test]
async fn test_resume_suspend_unchanged() {
    let c = connector(&["rem1"]).await;
    let (doc, rev) = create_doc(&c, &["rem1"], b"committed").await;
    let pre = suspend_doc(&c, doc, rev, b"draft").await;

    let mut w = c.resume(doc, pre).await.unwrap();
    let again = w.suspend().await.unwrap();

    assert_eq!(again, pre);
    let l = c.lookup(doc).await.unwrap();
    assert_eq!(l.revs(), vec![rev]);
    assert_eq!(l.pre_revs(), vec![pre]);
}

#[tokio::test]
async fn test_resume_suspend_modified() {
    let c = connector(&["rem1"]).await;
    let (doc, rev) = create_doc(&c, &["rem1"], b"committed").await;
    let pre = suspend_doc(&c, doc, rev, b"draft").await;

    let mut w = c.resume(doc, pre).await.unwrap();
    w.write_all("FILE", b"second draft").unwrap();
    let replaced = w.suspend().await.unwrap();

    assert_ne!(replaced, pre);
    let l = c.lookup(doc).await.unwrap();
    assert_eq!(l.revs(), vec![rev]);
    assert_eq!(l.pre_revs(), vec![replaced]);
    assert_eq!(c.stat(replaced).await.unwrap().parents(), &[rev]);
}

#[tokio::test]
async fn test_forget() {
    let c = connector(&["rem1"]).await;
    let (doc, rev) = create_doc(&c, &["rem1"], b"committed").await;
    let first = suspend_doc(&c, doc, rev, b"draft one").await;
    let second = suspend_doc(&c, doc, rev, b"draft two").await;

    assert!(matches!(c.forget(doc, rev).await, Err(Error::InvalidState(_))));

    c.forget(doc, first).await.unwrap();
    let l = c.lookup(doc).await.unwrap();
    assert_eq!(l.revs(), vec![rev]);
    assert_eq!(l.pre_revs(), vec![second]);

    assert!(matches!(c.forget(doc, first).await, Err(Error::InvalidState(_))));
}

// ---- store availability ----

#[tokio::test]
async fn test_commit_is_all_or_nothing() {
    let c = connector(&["rem1", "rem2"]).await;
    let (doc, rev) = create_doc(&c, &["rem1", "rem2"], b"one").await;

    let rem2 = c.store(&StoreId::new("rem2")).await.unwrap();
    let mut w = c.update(doc, rev, None, None).await.unwrap();
    w.write_all("FILE", b"two").unwrap();

    rem2.set_online(false);
    match w.commit().await {
        Err(Error::StoreUnavailable(id)) => assert_eq!(id, StoreId::new("rem2")),
        other => panic!("expected unavailable store, got {:?}", other.map(|id| id.to_hex())),
    }
    assert!(!w.is_finalized());
    let l = c.lookup(doc).await.unwrap();
    assert_eq!(l.revs(), vec![rev]);

    rem2.set_online(true);
    let next = w.commit().await.unwrap();
    assert_eq!(c.lookup(doc).await.unwrap().revs(), vec![next]);
    assert_eq!(c.stat(next).await.unwrap().stores(), ids(&["rem1", "rem2"]).as_slice());
}

#[tokio::test]
async fn test_update_with_unreachable_replica() {
    let c = connector(&["rem1", "rem2"]).await;
    let (doc, rev) = create_doc(&c, &["rem1", "rem2"], b"one").await;

    let rem2 = c.store(&StoreId::new("rem2")).await.unwrap();
    rem2.set_online(false);
    match c.update(doc, rev, None, None).await {
        Err(Error::StoreUnavailable(id)) => assert_eq!(id, StoreId::new("rem2")),
        Err(e) => panic!("expected unavailable store, got {}", e),
        Ok(w) => panic!("writer opened for {:?} with rem2 offline", w.target_stores()),
    }

    rem2.set_online(true);
    let l = c.lookup(doc).await.unwrap();
    assert_eq!(l.rev(&StoreId::new("rem1")), Some(rev));
    assert_eq!(l.rev(&StoreId::new("rem2")), Some(rev));
}

#[tokio::test]
async fn test_mutations_need_every_replica() {
    let c = connector(&["rem1", "rem2"]).await;
    let (doc, rev) = create_doc(&c, &["rem1", "rem2"], b"one").await;
    let pre = suspend_doc(&c, doc, rev, b"draft").await;
    let newer = update_doc(&c, doc, rev, &["rem1"], b"two").await;

    let rem2 = c.store(&StoreId::new("rem2")).await.unwrap();
    rem2.set_online(false);
    assert!(matches!(c.sync(doc, None).await, Err(Error::StoreUnavailable(_))));
    assert!(matches!(c.resume(doc, pre).await, Err(Error::StoreUnavailable(_))));
    assert!(matches!(c.forget(doc, pre).await, Err(Error::StoreUnavailable(_))));
    assert!(matches!(c.delete_doc(doc, pre).await, Err(Error::StoreUnavailable(_))));
    assert!(matches!(c.fork(rev, "test.baz").await, Err(Error::StoreUnavailable(_))));

    // reads still answer from the reachable replica
    assert_eq!(c.lookup(doc).await.unwrap().revs(), vec![newer]);
    assert_eq!(c.stat(rev).await.unwrap().stores(), ids(&["rem1"]).as_slice());

    rem2.set_online(true);
    let l = c.lookup(doc).await.unwrap();
    assert_eq!(l.rev(&StoreId::new("rem2")), Some(rev));
    assert_eq!(l.pre_revs(), vec![pre]);
    assert_eq!(c.sync(doc, None).await.unwrap(), newer);
}

#[tokio::test]
async fn test_sync_with_unreachable_store() {
    let c = connector(&["rem1", "rem2"]).await;
    let (doc, rev) = create_doc(&c, &["rem1", "rem2"], b"one").await;
    let newer = update_doc(&c, doc, rev, &["rem1"], b"two").await;

    let rem2 = c.store(&StoreId::new("rem2")).await.unwrap();
    rem2.set_online(false);
    assert!(matches!(
        c.sync(doc, Some(&ids(&["rem1", "rem2"]))).await,
        Err(Error::StoreUnavailable(_))
    ));
    assert_eq!(c.lookup(doc).await.unwrap().revs(), vec![newer]);

    rem2.set_online(true);
    assert_eq!(c.lookup(doc).await.unwrap().rev(&StoreId::new("rem2")), Some(rev));
}

// ---- reading and lifecycle ----

#[tokio::test]
async fn test_peek() {
    let c = connector(&["rem1"]).await;
    let mut w = c.create("public.data", "test.foo", &ids(&["rem1"])).await.unwrap();
    w.write_all("FILE", b"content").unwrap();
    w.write_all("META", b"{}").unwrap();
    let rev = w.commit().await.unwrap();

    let r = c.peek(rev).await.unwrap();
    assert_eq!(r.parts(), vec!["FILE", "META"]);
    assert_eq!(r.size("META"), Some(2));
    assert_eq!(r.store(), &StoreId::new("rem1"));
    assert_eq!(r.read_all("FILE").await.unwrap(), Bytes::from_static(b"content"));
    assert!(matches!(r.read_all("NOPE").await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_delete_doc_and_rev() {
    let c = connector(&["rem1", "rem2"]).await;
    let (doc, rev) = create_doc(&c, &["rem1", "rem2"], b"one").await;
    let (other, _) = create_doc(&c, &["rem1"], b"other").await;

    let mut docs = vec![doc, other];
    docs.sort();
    assert_eq!(c.documents().await.unwrap(), docs);

    c.delete_doc(doc, rev).await.unwrap();
    assert!(matches!(c.lookup(doc).await, Err(Error::NotFound(_))));
    assert_eq!(c.documents().await.unwrap(), vec![other]);

    c.delete_rev(rev).await.unwrap();
    assert!(matches!(c.stat(rev).await, Err(Error::NotFound(_))));
    assert!(matches!(c.delete_rev(rev).await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_disk_stores_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    let config = ConnectorConfig {
        stores: vec![
            StoreConfig {
                id: StoreId::new("disk1"),
                backend: StoreBackendConfig::Disk {
                    path: tmp.path().join("disk1"),
                },
            },
            StoreConfig {
                id: StoreId::new("disk2"),
                backend: StoreBackendConfig::Disk {
                    path: tmp.path().join("disk2"),
                },
            },
        ],
        ..ConnectorConfig::default()
    };

    let (doc, rev) = {
        let c = Connector::from_config(&config).await.unwrap();
        let (doc, rev) = create_doc(&c, &["disk1"], b"persistent").await;
        assert_eq!(c.sync(doc, Some(&ids(&["disk1", "disk2"]))).await.unwrap(), rev);
        (doc, rev)
    };

    let c = Connector::from_config(&config).await.unwrap();
    let l = c.lookup(doc).await.unwrap();
    assert_eq!(l.revs(), vec![rev]);
    assert_eq!(l.stores(), ids(&["disk1", "disk2"]));
    assert_eq!(
        c.peek(rev).await.unwrap().read_all("FILE").await.unwrap(),
        Bytes::from_static(b"persistent")
    );
}
