//! System requirements validation.
//!
//! This module provides functions to check that the host system can run the
//! sandbox before the server accepts any calls.

mod requirements;

pub use requirements::{
    SystemRequirements, check_all, check_python_interpreter, check_user_namespaces,
};
