pub mod chat;
pub mod check;
pub mod data;
pub mod image;
