/// Jobs are identified by a UUID (v4) allocated at submission time.
pub type JobId = uuid::Uuid;

/// Opaque transfer handle issued by the download daemon.
///
/// aria2 hands out 16-character hex GIDs; submissions satisfied from the
/// local filesystem use a `local-` prefixed UUID instead.
pub type Gid = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
