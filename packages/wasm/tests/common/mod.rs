//! Shared helpers for the integration tests
#![allow(dead_code)]

use gram_codec_wasm::{BindingConfig, GramCodec, PrecompiledSource};

const GUEST_WAT: &str = include_str!("../fixtures/gram_guest.wat");

/// Assemble the test guest
pub fn guest_bytes() -> Vec<u8> {
    wat::parse_str(GUEST_WAT).expect("test guest should assemble")
}

pub fn codec_with(config: BindingConfig) -> GramCodec {
    GramCodec::load_sync(PrecompiledSource::from(guest_bytes()), config)
        .expect("test guest should instantiate")
}

pub fn codec() -> GramCodec {
    codec_with(BindingConfig::development())
}

/// Read one of the guest's exported counters
pub fn counter(codec: &GramCodec, name: &str) -> i32 {
    codec
        .with_guest(|guest| Ok(guest.exported_i32(name)))
        .unwrap()
        .unwrap_or_else(|| panic!("guest does not export {}", name))
}

pub fn table_live(codec: &GramCodec) -> usize {
    codec.with_guest(|guest| Ok(guest.table().live())).unwrap()
}
