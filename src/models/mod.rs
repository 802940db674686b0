mod apod;

pub use apod::{ApodEntry, EntryFilter, NewApodEntry};
