pub mod attachment;
pub mod push;
pub mod websocket;

pub mod conversation {
    pub mod schema;
    pub mod model;
    pub mod repository;
    pub mod repository_pg;
    pub mod registry;
    pub mod handle;
    pub mod service;
    pub mod route;
}

pub mod message {
    pub mod schema;
    pub mod model;
    pub mod state;
    pub mod repository;
    pub mod repository_pg;
    pub mod store;
    pub mod handle;
    pub mod route;
}
