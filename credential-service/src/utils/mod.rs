pub mod tokens;

pub use tokens::{constant_time_eq, generate_otp_code, generate_secret, hash_secret};
