/// Components that are mounted on the microscope rig inside the incubator.
pub mod microscope {
    /// Components that provide sensing capability.
    pub mod sensing {
        /// The capture rig which drives the timed image acquisition loop.
        pub mod capture;
    }
    /// Components that provide actuation capability.
    pub mod actuating {
        /// The GPIO light bank controls for stage illumination.
        pub mod illumination;
    }
}

/// Helpful prelude when working with components.
pub mod prelude {
    pub use crate::components::microscope::actuating::illumination::*;
    pub use crate::components::microscope::sensing::capture::*;
}
