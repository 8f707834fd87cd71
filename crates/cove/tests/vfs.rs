//! Mount table and router tests across adapters and workspaces.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use serde_json::{Value, json};

use cove::vfs::{MemoryAdapter, MountTable};
use cove::{VfsReason, VfsRouter};

async fn table() -> Arc<MountTable> {
    Arc::new(MountTable::new())
}

mod resolution {
    use super::*;

    #[tokio::test]
    async fn test_longest_prefix_regardless_of_mount_order() {
        for order in [["/a", "/a/b"], ["/a/b", "/a"]] {
            let mounts = table().await;
            for path in order {
                mounts.mount("ws", path, "memory", Value::Null).await.unwrap();
            }
            let resolved = mounts.resolve("ws", "/a/b/c").unwrap();
            assert_eq!(resolved.mount.path(), "/a/b");
            assert_eq!(resolved.relative, "c");

            let resolved = mounts.resolve("ws", "/a/bc").unwrap();
            assert_eq!(resolved.mount.path(), "/a");
            assert_eq!(resolved.relative, "bc");
        }
    }

    #[tokio::test]
    async fn test_unmounted_path() {
        let mounts = table().await;
        mounts.mount("ws", "/data", "memory", Value::Null).await.unwrap();
        let err = mounts.resolve("ws", "/other").unwrap_err();
        assert!(err.is(VfsReason::NoMount));
        let err = mounts.resolve("nope", "/data").unwrap_err();
        assert!(err.is(VfsReason::NoMount));
    }

    #[tokio::test]
    async fn test_workspaces_are_isolated() {
        let mounts = table().await;
        mounts.mount("a", "/", "memory", Value::Null).await.unwrap();
        mounts.mount("b", "/", "memory", Value::Null).await.unwrap();

        let a = mounts.router("a");
        let b = mounts.router("b");
        a.write("/f", b"from a").await.unwrap();
        assert!(!b.exists("/f").await.unwrap());
        assert_eq!(a.read("/f").await.unwrap(), b"from a");
    }

    #[tokio::test]
    async fn test_duplicate_and_unknown_mounts() {
        let mounts = table().await;
        mounts.mount("ws", "/m", "memory", Value::Null).await.unwrap();
        let err = mounts
            .mount("ws", "/m/", "memory", Value::Null)
            .await
            .unwrap_err();
        assert!(err.is(VfsReason::AlreadyExists));

        let err = mounts
            .mount("ws", "/x", "s3", Value::Null)
            .await
            .unwrap_err();
        assert!(err.is(VfsReason::MountFailed));

        mounts.unmount("ws", "/m").await.unwrap();
        assert!(mounts.unmount("ws", "/m").await.unwrap_err().is(VfsReason::NotFound));
        assert!(mounts.mounts("ws").is_empty());
    }
}

mod routing {
    use super::*;

    async fn layered() -> VfsRouter {
        let mounts = table().await;
        mounts.mount("ws", "/", "memory", Value::Null).await.unwrap();
        mounts
            .mount_adapter("ws", "/scratch", Arc::new(MemoryAdapter::new()))
            .await
            .unwrap();
        mounts.router("ws")
    }

    #[tokio::test]
    async fn test_mount_point_appears_in_listing() {
        let vfs = layered().await;
        vfs.write("/top.txt", b"1").await.unwrap();
        let names: Vec<String> = vfs
            .list("/")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert!(names.contains(&"scratch".to_string()));
        assert!(names.contains(&"top.txt".to_string()));
        assert!(vfs.stat("/scratch").await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_cross_adapter_move() {
        let vfs = layered().await;
        vfs.create_dir_all("/src/nested").await.unwrap();
        vfs.write("/src/nested/a.txt", b"alpha").await.unwrap();

        vfs.rename("/src", "/scratch/dst").await.unwrap();
        assert!(!vfs.exists("/src").await.unwrap());
        assert_eq!(vfs.read("/scratch/dst/nested/a.txt").await.unwrap(), b"alpha");
    }

    #[tokio::test]
    async fn test_move_into_itself_rejected() {
        let vfs = layered().await;
        vfs.mkdir("/d").await.unwrap();
        let err = vfs.rename("/d", "/d/inner").await.unwrap_err();
        assert!(err.is(VfsReason::PathTraversal));
        let err = vfs.rename("/scratch", "/elsewhere").await.unwrap_err();
        assert!(err.is(VfsReason::Unsupported));
    }

    #[tokio::test]
    async fn test_errors_name_the_virtual_path() {
        let vfs = layered().await;
        let err = vfs.read("/scratch/missing.txt").await.unwrap_err();
        assert!(err.is(VfsReason::NotFound));
        assert!(err.to_string().contains("/scratch/missing.txt"));
    }
}

mod local {
    use super::*;

    #[tokio::test]
    async fn test_local_mount_reads_and_writes_host_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("host.txt"), "from host").unwrap();

        let mounts = table().await;
        mounts
            .mount(
                "ws",
                "/host",
                "local",
                json!({ "root": dir.path().to_string_lossy() }),
            )
            .await
            .unwrap();
        let vfs = mounts.router("ws");

        assert_eq!(vfs.read("/host/host.txt").await.unwrap(), b"from host");
        vfs.write("/host/new.txt", b"from vfs").await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("new.txt")).unwrap(),
            "from vfs"
        );

        // dot-dot clamps at the virtual root, never escaping the host dir
        assert!(vfs.read("/host/../../host.txt").await.is_err());
    }

    #[tokio::test]
    async fn test_local_mount_requires_existing_root() {
        let mounts = table().await;
        let err = mounts
            .mount("ws", "/", "local", json!({ "root": "/definitely/not/here" }))
            .await
            .unwrap_err();
        assert!(err.is(VfsReason::MountFailed));
        let err = mounts.mount("ws", "/", "local", json!({})).await.unwrap_err();
        assert!(err.is(VfsReason::MountFailed));
    }
}
