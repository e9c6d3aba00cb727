//! World mutation and persistence engine for a multiplayer voxel
//! server. Levels own a dense block grid, an append-only change log, a
//! physics schedule and a pending broadcast queue; every mutation goes
//! through [`level::Level`] so the log order always matches the grid.

pub mod blockdb;
pub mod broadcast;
pub mod commands;
pub mod config;
pub mod draw;
pub mod drawops;
pub mod events;
pub mod level;
pub mod permissions;
pub mod physics;
pub mod player;
pub mod rules;
pub mod server;
