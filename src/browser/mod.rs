pub mod chrome_session;
pub mod connection;
pub mod launch;
pub mod scripts;

pub use chrome_session::{ChromeSession, ChromeSessionFactory};
pub use connection::connect_to_browser;
pub use launch::launch_browser;
