pub mod preference;
pub mod session;
