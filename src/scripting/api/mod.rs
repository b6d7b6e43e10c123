//! Native modules available inside a sandbox
//!
//! Each submodule provides functions under `<module>::*`

pub mod worker;
