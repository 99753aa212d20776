pub mod health;
pub mod unfurl;
