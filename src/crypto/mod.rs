pub mod keys;
pub mod ring;
pub mod stealth;
