mod handler;

pub use handler::unfurl;
