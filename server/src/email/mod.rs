pub mod client;
pub mod gmail_message;
pub mod html;
pub mod mime;
pub mod normalized_message;
