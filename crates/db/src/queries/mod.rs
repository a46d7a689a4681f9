pub mod customers;
pub mod designs;
pub mod nonces;
pub mod registrations;
pub mod strips;
