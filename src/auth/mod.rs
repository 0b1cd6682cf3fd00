//! Session management.
//!
//! The session is a cookie string persisted by [`CredentialStore`]. It is
//! obtained either by the password login exchange in [`login`] or by importing
//! a cookie copied from a browser.

mod credentials;
mod login;

pub use credentials::{CredentialStore, Credentials};
pub use login::{CommandCipher, PasswordCipher, UserProfile, current_user, login};
