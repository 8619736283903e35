//! Boot and rollback entries for snapshot sets

mod common;

use common::{Fixture, Op, KERNEL_VERSION};
use snapm::boot::{ROLLBACK_ARG, SNAPSET_ARG};
use snapm::{Error, Selection};

#[test]
fn boot_entry_mounts_snapshots() {
    let fx = Fixture::new();
    let root = fx.provider.add_snapshot("daily", 100, "/");
    let home = fx.provider.add_snapshot("daily", 100, "/home");
    let mut manager = fx.manager();

    manager.create_snapshot_set_boot_entry(Some("daily"), None).unwrap();

    let snapset = &manager.snapshot_sets()[0];
    let entry = snapset.boot_entry().expect("boot entry attached");
    assert_eq!(entry.snapset_uuid(), Some(snapset.uuid()));
    assert_eq!(entry.version, KERNEL_VERSION);
    assert!(entry.title.starts_with("Snapshot daily "));
    assert_eq!(
        entry.options,
        format!(
            "root=/dev/mock/{} ro \
             systemd.mount-extra=/dev/mock/{}:/home:ext4:defaults,noatime {}={}",
            root,
            home,
            SNAPSET_ARG,
            snapset.uuid()
        )
    );
    // Boot entries need the members to come up at boot
    assert!(snapset.autoactivate().unwrap());
}

#[test]
fn rollback_entry_mounts_origins() {
    let fx = Fixture::new();
    fx.provider.add_snapshot("daily", 100, "/");
    fx.provider.add_snapshot("daily", 100, "/var");
    let mut manager = fx.manager();

    manager.create_snapshot_set_rollback_entry(Some("daily"), None).unwrap();

    let snapset = &manager.snapshot_sets()[0];
    let entry = snapset.rollback_entry().expect("rollback entry attached");
    assert!(entry.title.starts_with("Rollback daily "));
    assert_eq!(
        entry.options,
        format!(
            "root=/dev/mock/root ro systemd.mount-extra=/dev/mock/var:/var:xfs:defaults {}={}",
            ROLLBACK_ARG,
            snapset.uuid()
        )
    );
    assert!(snapset.boot_entry().is_none());
}

#[test]
fn boot_entry_requires_one_matching_set() {
    let fx = Fixture::new();
    fx.provider.add_snapshot("daily", 100, "/");
    fx.provider.add_snapshot("daily", 200, "/home");
    let mut manager = fx.manager();

    assert!(matches!(
        manager.create_snapshot_set_boot_entry(Some("monthly"), None),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        manager.create_snapshot_set_boot_entry(Some("daily"), None),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        manager.create_snapshot_set_boot_entry(None, None),
        Err(Error::NotFound(_))
    ));
    assert_eq!(fx.boot.len(), 0);

    let uuid = manager.snapshot_sets()[1].uuid();
    manager.create_snapshot_set_boot_entry(None, Some(uuid)).unwrap();
    assert_eq!(fx.boot.len(), 1);
}

#[test]
fn second_boot_entry_is_rejected() {
    let fx = Fixture::new();
    fx.provider.add_snapshot("daily", 100, "/");
    let mut manager = fx.manager();

    manager.create_snapshot_set_boot_entry(Some("daily"), None).unwrap();
    assert!(matches!(
        manager.create_snapshot_set_boot_entry(Some("daily"), None),
        Err(Error::Exists(_))
    ));
    assert_eq!(fx.boot.len(), 1);
}

#[test]
fn inactive_set_gets_no_boot_entry() {
    let fx = Fixture::new();
    let root = fx.provider.add_snapshot("daily", 100, "/");
    fx.provider.set_active(&root, false);
    let mut manager = fx.manager();

    assert!(matches!(
        manager.create_snapshot_set_boot_entry(Some("daily"), None),
        Err(Error::Snapm(_))
    ));
    assert_eq!(fx.boot.len(), 0);
}

#[test]
fn entries_reattached_on_discovery() {
    let fx = Fixture::new();
    fx.provider.add_snapshot("daily", 100, "/");
    fx.provider.add_snapshot("weekly", 50, "/home");
    {
        let mut manager = fx.manager();
        manager.create_snapshot_set_boot_entry(Some("daily"), None).unwrap();
        manager.create_snapshot_set_rollback_entry(Some("daily"), None).unwrap();
    }

    let manager = fx.manager();
    let daily = manager.find_snapshot_sets(&Selection::by_name("daily")).unwrap()[0];
    let weekly = manager.find_snapshot_sets(&Selection::by_name("weekly")).unwrap()[0];
    assert!(daily.boot_entry().is_some());
    assert!(daily.rollback_entry().is_some());
    assert!(weekly.boot_entry().is_none());
    assert!(weekly.rollback_entry().is_none());
}

#[test]
fn delete_removes_entries() {
    let fx = Fixture::new();
    fx.provider.add_snapshot("daily", 100, "/");
    let mut manager = fx.manager();
    manager.create_snapshot_set_boot_entry(Some("daily"), None).unwrap();
    manager.create_snapshot_set_rollback_entry(Some("daily"), None).unwrap();
    assert_eq!(fx.boot.len(), 2);

    let outcome = manager.delete_snapshot_sets(&Selection::by_name("daily")).unwrap();
    assert!(outcome.is_complete());
    assert_eq!(fx.boot.len(), 0);
}

#[test]
fn rename_moves_entries_to_new_uuid() {
    let fx = Fixture::new();
    fx.provider.add_snapshot("daily", 100, "/");
    let mut manager = fx.manager();
    manager.create_snapshot_set_boot_entry(Some("daily"), None).unwrap();
    let old_uuid = manager.snapshot_sets()[0].uuid();

    let renamed = manager.rename_snapshot_set("daily", "kept").unwrap();
    let new_uuid = renamed.uuid();
    assert_ne!(old_uuid, new_uuid);
    assert_eq!(
        renamed.boot_entry().and_then(|e| e.snapset_uuid()),
        Some(new_uuid)
    );

    let entries = fx.boot.all();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].snapset_uuid(), Some(new_uuid));
}

#[test]
fn rename_moves_boot_and_rollback_entries() {
    let fx = Fixture::new();
    fx.provider.add_snapshot("daily", 100, "/");
    fx.provider.add_snapshot("daily", 100, "/var");
    let mut manager = fx.manager();
    manager.create_snapshot_set_boot_entry(Some("daily"), None).unwrap();
    manager.create_snapshot_set_rollback_entry(Some("daily"), None).unwrap();

    let renamed = manager.rename_snapshot_set("daily", "kept").unwrap();
    let new_uuid = renamed.uuid();
    assert_eq!(renamed.boot_entry().and_then(|e| e.snapset_uuid()), Some(new_uuid));
    assert_eq!(
        renamed.rollback_entry().and_then(|e| e.rollback_uuid()),
        Some(new_uuid)
    );

    let entries = fx.boot.all();
    assert_eq!(entries.len(), 2);
    for entry in &entries {
        assert!(entry.options.ends_with(&new_uuid.to_string()));
    }
}

#[test]
fn inactive_set_with_boot_entry_is_not_renamed() {
    let fx = Fixture::new();
    let root = fx.provider.add_snapshot("daily", 100, "/");
    let mut manager = fx.manager();
    manager.create_snapshot_set_boot_entry(Some("daily"), None).unwrap();
    manager.create_snapshot_set_rollback_entry(Some("daily"), None).unwrap();
    let outcome = manager.deactivate_snapshot_sets(&Selection::by_name("daily")).unwrap();
    assert!(outcome.is_complete());

    assert!(matches!(
        manager.rename_snapshot_set("daily", "kept"),
        Err(Error::Snapm(_))
    ));
    assert_eq!(fx.provider.snapshot_names(), vec![root]);
    let snapset = &manager.snapshot_sets()[0];
    assert_eq!(snapset.name(), "daily");
    assert!(snapset.boot_entry().is_some());
    assert!(snapset.rollback_entry().is_some());
    assert_eq!(fx.boot.len(), 2);
}

#[test]
fn rename_drops_entries_that_cannot_be_recreated() {
    let fx = Fixture::new();
    fx.provider.add_snapshot("daily", 100, "/");
    let mut manager = fx.manager();
    manager.create_snapshot_set_boot_entry(Some("daily"), None).unwrap();
    manager.create_snapshot_set_rollback_entry(Some("daily"), None).unwrap();
    fx.boot.fail_create(true);

    assert!(matches!(
        manager.rename_snapshot_set("daily", "kept"),
        Err(Error::Io(_))
    ));
    // Members were renamed; no entry still points at the old devices
    let snapset = &manager.snapshot_sets()[0];
    assert_eq!(snapset.name(), "kept");
    assert!(snapset.boot_entry().is_none());
    assert!(snapset.rollback_entry().is_none());
    assert_eq!(fx.boot.len(), 0);
}

#[test]
fn delete_keeps_set_when_entry_removal_fails() {
    let fx = Fixture::new();
    let root = fx.provider.add_snapshot("daily", 100, "/");
    let mut manager = fx.manager();
    manager.create_snapshot_set_boot_entry(Some("daily"), None).unwrap();
    fx.boot.fail_delete(true);

    let outcome = manager.delete_snapshot_sets(&Selection::by_name("daily")).unwrap();
    assert_eq!(outcome.affected, 0);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(fx.provider.snapshot_names(), vec![root]);
    assert_eq!(fx.boot.len(), 1);
    let snapset = &manager.snapshot_sets()[0];
    assert_eq!(snapset.nr_snapshots(), 1);
    assert!(snapset.boot_entry().is_some());

    fx.boot.fail_delete(false);
    let outcome = manager.delete_snapshot_sets(&Selection::by_name("daily")).unwrap();
    assert_eq!(outcome.affected, 1);
    assert!(fx.provider.snapshot_names().is_empty());
    assert_eq!(fx.boot.len(), 0);
}

#[test]
fn autoactivate_failure_blocks_boot_entry() {
    let fx = Fixture::new();
    fx.provider.add_snapshot("daily", 100, "/");
    fx.provider.add_snapshot("daily", 100, "/home");
    fx.provider.fail(Op::Autoactivate, "/");
    let mut manager = fx.manager();

    assert!(matches!(
        manager.create_snapshot_set_boot_entry(Some("daily"), None),
        Err(Error::Callout { .. })
    ));
    assert_eq!(fx.boot.len(), 0);
    assert!(manager.snapshot_sets()[0].boot_entry().is_none());
}
