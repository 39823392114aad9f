/**
The petri control system runs a small automated microscope that lives inside
an incubator and images a specimen culture on a fixed schedule. Functionality
is separated into a core library that the thin system binaries (image capture,
stage illumination) link against, rather than managing a singular and highly
coupled monolithic binary; this keeps iterations on one control loop from
disturbing the other while the rig is deployed.
*/

/// Components in the system are created by grouping together
/// devices into a logical unit that performs some function
/// for the overall control system.
pub mod components;
/// Devices that are an atomic unit, and can be composed
/// with other devices into components to perform some function.
pub mod devices;
/// Development utilities for working with serialisation and
/// image information.
pub mod utils;
