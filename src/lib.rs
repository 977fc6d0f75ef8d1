//! Library crate for live-arena-back: live quizzes, bracket tournaments and chat
//! polls over a path-addressable session store, exposed to the binaries and
//! integration tests.

pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;
