//! Process-wide codec tests
//!
//! Kept in their own test binary so the global starts empty.

mod common;

use common::{counter, guest_bytes};
use gram_codec_wasm::{global, BindingConfig, BindingError, ModuleSource, PrecompiledSource};

#[tokio::test]
async fn test_global_init_is_idempotent() {
    assert!(matches!(global::codec(), Err(BindingError::NotInitialized)));

    // A failed init publishes nothing
    let failed = global::init(
        ModuleSource::Bytes(bytes::Bytes::from_static(b"not wasm")),
        BindingConfig::development(),
    )
    .await;
    assert!(failed.is_err());
    assert!(!global::is_initialized());

    let first = global::init(guest_bytes().into(), BindingConfig::development())
        .await
        .unwrap();
    assert!(global::is_initialized());

    // Later inits return the existing codec without loading their source
    let second = global::init(
        ModuleSource::Path("does/not/exist.wasm".into()),
        BindingConfig::development(),
    )
    .await
    .unwrap();
    let third =
        global::init_sync(PrecompiledSource::from(guest_bytes()), BindingConfig::development())
            .unwrap();

    assert!(first.ptr_eq(&second));
    assert!(first.ptr_eq(&third));
    assert!(global::codec().unwrap().ptr_eq(&first));
    assert_eq!(counter(&first, "start_calls"), 1);

    let default = global::init_default(BindingConfig::development())
        .await
        .unwrap();
    assert!(default.ptr_eq(&first));
}
