//!  Storage is organized through [record_storage::RecordStorage].
//!  The basic idea is:
//!   - There is a fixed set of named records, see [record_storage::RecordKey].
//!   - Every read and write moves whole records, like the browser's `storage.local`.
//!   - Usage and attempt tables are keyed by local day, then by domain, then by hour.

pub mod entities;
pub mod record_storage;
