mod local;
mod vercel;

pub use local::LocalBackend;
pub use vercel::{VercelBackend, VercelCredentials};
