//! Fingerprint specs: JA3 ClientHello synthesis, Akamai H2 shaping,
//! navigator-level client hints and browser presets.

pub mod ext;
pub mod h2spec;
pub mod ja3;
pub mod navigator;
pub mod profiles;

pub use ext::{Extension, GreaseSeed, KeyShare, GREASE_PLACEHOLDER};
pub use h2spec::{H2Spec, PrioritySpec, PseudoHeader};
pub use ja3::{ClientHelloSpec, SessionIdPolicy};
pub use navigator::{BrowserFamily, Navigator};
pub use profiles::Profile;
