pub mod block;
pub mod coords;
pub mod grid;
pub mod packed;
