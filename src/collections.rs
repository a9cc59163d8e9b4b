//! Keyed collection primitives backing the replica state.

pub mod object_repository;
pub mod ordered_dictionary;

pub use object_repository::ObjectRepository;
pub use ordered_dictionary::{InsertMode, OrderedDictionary};
