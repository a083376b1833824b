mod sessions;

pub use sessions::StoredSession;
