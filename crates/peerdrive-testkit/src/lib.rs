//! # peerdrive testkit
//!
//! Testing utilities for peerdrive.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a drive manager, master key and grant service ready to
//!   issue grants and build contexts; in-memory tenants
//! - **Generators**: proptest strategies for permissions, drives and identities
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use peerdrive_testkit::generators::GrantParams;
//!
//! proptest! {
//!     #[test]
//!     fn storage_key_follows_read(params: GrantParams) {
//!         // issue a grant from `params` and check each drive grant
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use peerdrive_perms::DrivePermission;
//! use peerdrive_testkit::fixtures::TestFixture;
//!
//! async fn example() {
//!     let fixture = TestFixture::new();
//!     let drive = fixture.drive("chat").await.unwrap();
//!     let issued = fixture
//!         .issue(&[(drive.target_drive, DrivePermission::READ_WRITE)], true)
//!         .await
//!         .unwrap();
//!     let ctx = fixture.context(&issued).await.unwrap();
//!     assert!(ctx.assert_can_write_drive(&drive.id).is_ok());
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{identities, memory_tenant, IssuedGrant, TestFixture};
pub use generators::{GrantParams, UnionParams};
