pub mod client {
    pub mod client;
    pub mod error;
    pub mod retry;
}
pub mod api {
    pub mod models {
        pub mod video;
    }
    pub mod client;
}

pub mod logger;
pub mod models;
pub mod utils;
