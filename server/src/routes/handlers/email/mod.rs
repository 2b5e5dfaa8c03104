mod modify;
mod read;

pub use modify::{mark_read, mark_unread, restore, toggle_star, trash};
pub use read::{get_email, get_email_details, get_emails, load_inbox};
