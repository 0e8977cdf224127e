//! A directory-backed [`revmut::ObjectStore`].

mod store;
mod wait;

pub use store::LocalStore;
