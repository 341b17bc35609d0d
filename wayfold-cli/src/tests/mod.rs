//! Shared test harness modules for the Wayfold CLI.

use super::*;

mod helpers;
mod unit;
