//! Cache-first client engine for versioned, addressable notes on Nostr
//! relays.
//!
//! Three pieces make up the core: the [`note`] model maps raw network events
//! to resolved documents (including the encrypted draft-wrapper envelope),
//! the [`cache`] answers address lookups locally before falling through to
//! the network, and the [`store`] keeps the session owner's resolved notes
//! with search and snapshot persistence. A [`session::Session`] wires them
//! together with the signing and self-encryption collaborators.

pub mod cache;
pub mod cipher;
pub mod config;
pub mod event;
pub mod note;
pub mod relay;
pub mod session;
pub mod signer;
pub mod store;
