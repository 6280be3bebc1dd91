//! # wallstream-server
//!
//! Stores published wallpapers and serves each publisher's current
//! descriptor to polling subscribers.
//!
//! ## API Surface
//!
//! | Route | Auth | Purpose |
//! |---|---|---|
//! | `GET /health` | no | liveness |
//! | `GET /state/{publisher_id}` | no | current descriptor |
//! | `GET /files/{filename}` | no | uploaded image |
//! | `POST /api/files/upload` | yes | store raw image body |
//! | `GET, POST /api/publisher/devices` | yes | list / register devices |
//! | `POST /api/publisher/wallpaper` | yes | publish an upload |
//! | `GET /api/publisher/wallpaper/{device_id}` | yes | published records |
//! | `DELETE /api/publisher/wallpaper/{device_id}/{hash}` | yes | retract a record |

pub mod error;
pub mod guard;
mod keyed;
pub mod principal;
pub mod repository;
pub mod routes;
pub mod state;
pub mod state_store;

pub use routes::app;
