//! Repository layer for data access

pub mod entries;

pub use entries::DbEntryRepository as EntryRepository;
