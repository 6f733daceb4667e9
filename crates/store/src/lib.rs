//! Durable device identities and their binding to tenant accounts.
//!
//! The upstream library owns device credentials; this crate owns the
//! `{wa_account_id → device_jid}` mapping that decides *which* device a
//! tenant account uses. The mapping is the authoritative record: a missing
//! row always means "allocate a fresh device", never "borrow whichever
//! device happens to exist" — sharing credentials between two accounts
//! would let one tenant send as another.

mod device;

pub use device::{DeviceRecord, DeviceStore, SqliteDeviceStore};
