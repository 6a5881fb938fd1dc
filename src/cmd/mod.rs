//! CLI command implementations.
//!
//! | Module     | Commands handled                                          |
//! |------------|-----------------------------------------------------------|
//! | `register` | `Start`, `Finalize`, `Status`, `Clear`, `Predict`, `Sweep` |
//! | `project`  | `Init`                                                    |
//! | `config`   | `Config`                                                  |

pub mod config;
pub mod project;
pub mod register;

pub use config::cmd_config;
pub use project::cmd_init;
pub use register::{
    cmd_clear, cmd_finalize, cmd_predict, cmd_start, cmd_status, cmd_sweep, parse_founder,
};
