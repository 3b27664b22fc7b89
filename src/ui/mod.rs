//! Local control API
//!
//! - `GET /api/status`: session status
//! - `GET /api/devices`: audio devices
//! - `GET /api/trackers` / `DELETE /api/trackers` / `DELETE /api/trackers/:id`
//! - `POST /api/session/start` / `POST /api/session/stop`
//! - `POST /api/frames`: JPEG or PNG body, submitted as the camera frame
//! - `GET /ws`: JSON stream of session events

pub mod handlers;
pub mod server;
pub mod websocket;

pub use server::{AppState, WebServer};
