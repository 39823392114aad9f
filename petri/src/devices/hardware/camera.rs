use crate::utils::image::{CameraPixelFormat, Roi};
use aravis::{AcquisitionMode, Camera, CameraExt, CameraExtManual, StreamExt};
use chrono::{DateTime, Utc};
use image::{DynamicImage, GenericImageView};
use serde::{de::Visitor, Deserialize, Serialize};
use std::{
    ffi::OsStr,
    net::Ipv4Addr,
    path::Path,
    thread,
    time::{Duration, Instant},
};
use strum_macros::{EnumString, IntoStaticStr};
use thiserror::Error;
use uuid::Uuid;

/// You can trigger the device in several ways as per the
/// genicam standard, however for the petri use case only
/// the software trigger was implemented.
#[derive(EnumString, Deserialize, Serialize, IntoStaticStr, Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceTrigger {
    /// Software available trigger.
    Software,
}

/// Due to rusts orphan rule at times we need to provide wrapper types for struct's
/// that come from other crates. The convention used in this software is to lead with
/// `WrapperNameOfType`. This is seen a lot with the serde crate.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct WrapperAcquisitionMode(pub AcquisitionMode);

impl Serialize for WrapperAcquisitionMode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self.0 {
            AcquisitionMode::Continuous => {
                serializer.serialize_unit_variant("AcquisitionMode", 0, "Continuous")
            }
            AcquisitionMode::SingleFrame => {
                serializer.serialize_unit_variant("AcquisitionMode", 1, "SingleFrame")
            }
            _ => panic!("Unknown acquisition mode"),
        }
    }
}

impl<'de> Deserialize<'de> for WrapperAcquisitionMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(AcquisitionModeVisitor {})
    }
}

/// When implementing serde types we need to provide a `Visitor` type which is used
/// for the implementation of the Visitor trait. See the [serde] crate for more
/// information.
struct AcquisitionModeVisitor {}

impl<'de> Visitor<'de> for AcquisitionModeVisitor {
    type Value = WrapperAcquisitionMode;

    fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("Could not deserialise AcquisitionMode")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        match v {
            "Continuous" => Ok(WrapperAcquisitionMode(AcquisitionMode::Continuous)),
            "SingleFrame" => Ok(WrapperAcquisitionMode(AcquisitionMode::SingleFrame)),
            _ => Err(serde::de::Error::custom(
                "Unknown acquisition mode format {v:?}",
            )),
        }
    }
}

/// Camera configuration struct contains all of the parameters
/// that interface with the genicam standard, and the aravis camera driver.
/// The incubator light level is fixed by the lamp bank, so exposure and
/// gain are set manually here rather than left on the auto algorithms.
#[derive(Deserialize, Serialize, Clone, PartialEq)]
pub struct PetriCameraConfig {
    /// Location of the device on the rig as per bill of materials.
    stage_position_id: Option<u8>,
    /// Network address of the camera.
    ip_address: Ipv4Addr,
    /// Region of interest (ROI), used for cropping the camera frame to the dish.
    roi: Option<Roi>,
    /// Different cameras provide different pixel compression formats.
    pixel_format: Option<CameraPixelFormat>,
    /// The type of trigger to set for the camera to capture an image.
    trigger: Option<DeviceTrigger>,
    /// Acquisition mode determines how the images are captured such as continuous or single frame.
    acquisition_mode: Option<WrapperAcquisitionMode>,
    /// Manual exposure time in microseconds.
    exposure_us: Option<f64>,
    /// Manual analog gain in dB.
    gain_db: Option<f64>,
    /// A cameras ability to send data over a network is impacted by the MTU size, this setting
    /// automatically determines the maximum MTU that the camera can apply.
    auto_packet_size: Option<bool>,
}

impl PetriCameraConfig {
    /// Create new camera configuration using defaults.
    ///
    /// * `ip_address`: IP address of networked camera.
    pub fn new(ip_address: impl Into<Ipv4Addr>) -> Self {
        Self {
            ip_address: ip_address.into(),
            stage_position_id: Default::default(),
            roi: Default::default(),
            pixel_format: Default::default(),
            trigger: Default::default(),
            acquisition_mode: Default::default(),
            exposure_us: Default::default(),
            gain_db: Default::default(),
            auto_packet_size: Default::default(),
        }
    }

    /// Generates a new camera config from a file.
    ///
    /// * `filepath`: path to config file.
    pub fn from_file<F: AsRef<OsStr>>(filepath: F) -> Self {
        let file = Path::new(&filepath);
        let camera_config = if file.is_file() {
            let config_file = config::Config::builder()
                .add_source(config::File::new(
                    &file.to_string_lossy(),
                    config::FileFormat::Yaml,
                ))
                .build()
                .expect("Failed read config");
            config_file
                .try_deserialize::<PetriCameraConfig>()
                .expect("Failed to parse config file into struct")
        } else {
            panic!("Could not locate the config file {:?}", file);
        };
        camera_config
    }
}

/// Failures the capture loop can see while grabbing a still. Construction
/// problems panic instead; a camera that cannot be configured at startup
/// is a deployment fault, not something the loop can ride out.
#[derive(Debug, Error)]
pub enum FrameError {
    /// [`PetriCamera::begin_stills`] has not been called.
    #[error("capture session has not been started")]
    SessionNotStarted,
    /// The software trigger command was rejected.
    #[error("software trigger failed: {0}")]
    Trigger(String),
    /// No buffer came back before the deadline.
    #[error("camera did not deliver a frame within {0:?}")]
    Timeout(Duration),
    /// A buffer came back but could not be decoded into an image.
    #[error("frame buffer could not be decoded into an image")]
    BadFrame,
}

/// Streaming session state held between stills. The stream keeps one
/// pre-allocated buffer queued so a trigger can fill it immediately.
struct StillStream {
    /// Aravis stream attached to the camera.
    stream: aravis::Stream,
    /// Builder for replacement leaked-image buffers.
    build_buffer: Box<dyn Fn() -> aravis::Buffer + Send>,
}

/// The general method for integrating a new device into the petri system is to
/// give each item a specific UUID (for logging, telemetry, trouble shooting)
/// and allow a public interface to an underlying driver; for the camera that
/// driver is aravis (open source).
pub struct PetriCamera {
    /// Access to the aravis driver for camera functionality.
    pub driver: Camera,
    /// Unique identifier, helpful for trouble shooting and logging.
    uuid: Uuid,
    /// Location of the device on the rig as per bill of materials.
    stage_position_id: Option<u8>,
    /// Live still-capture session, if one has been started.
    session: Option<StillStream>,
}

impl PetriCamera {
    /// Return the unique identifier of the camera.
    pub fn get_uuid(&self) -> Uuid {
        self.uuid
    }

    /// Create a new petri camera by consuming a camera config.
    ///
    /// * `config`: Set of parameters that configure a network camera.
    pub fn new(config: PetriCameraConfig) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            stage_position_id: config.stage_position_id,
            driver: Self::build_from_config(config),
            session: None,
        }
    }

    /// Create a new petri camera by reading a file at a location,
    /// parsing it as a `PetriCameraConfig` and consuming that
    /// config as per the builder pattern.
    ///
    /// * `filepath`: path to the parameter file.
    pub fn from_config_file<F: AsRef<OsStr>>(filepath: F) -> Self {
        Self::new(PetriCameraConfig::from_file(filepath))
    }

    /// Create an aravis camera handle for the `PetriCamera` driver. Due to the
    /// way genicam works there can be issues with the order in which certain
    /// camera properties are set (it follows a graph approach). This can be
    /// frustrating to troubleshoot as a camera data sheet will specify a
    /// certain capability, but may not work given the order of configuration
    /// steps. If this happens the recommendation is to write additional unit
    /// tests below.
    ///
    /// * `config`: `PetriCamera` config struct
    fn build_from_config(config: PetriCameraConfig) -> Camera {
        let camera: Camera = match Camera::new(Some(&config.ip_address.to_string())) {
            Ok(c) => c,
            Err(e) => panic!("Failed to create camera {e:?}"),
        };

        if let Some(roi) = config.roi {
            if let Err(e) = camera.set_region(roi.x, roi.y, roi.w, roi.h) {
                panic!("Failed to set acquisition roi {e:?}")
            }

            if let Ok((x, y, w, h)) = camera.region() {
                assert!(x == roi.x, "Failed initialisation assert to set offset x");
                assert!(y == roi.y, "Failed initialisation assert to set offset y");
                assert!(w == roi.w, "Failed initialisation assert to set width  w");
                assert!(h == roi.h, "Failed initialisation assert to set height h");
            }
        }

        if let Some(pixel_format) = config.pixel_format {
            if let Err(e) = camera.set_pixel_format(pixel_format.0) {
                panic!("Failed to set pixel format {e:?}")
            }
        }

        if let Some(acquisition_mode) = config.acquisition_mode {
            if let Err(e) = camera.set_acquisition_mode(acquisition_mode.0) {
                panic!("Failed to set acquisition mode {e:?}")
            }
        }

        if let Some(exposure_us) = config.exposure_us {
            if let Ok(available) = camera.is_exposure_auto_available() {
                if available {
                    if let Err(e) = camera.set_exposure_time_auto(aravis::Auto::Off) {
                        panic!("Failed to disable auto exposure {e}");
                    }
                }
            }
            if let Err(e) = camera.set_exposure_time(exposure_us) {
                panic!("Failed to set exposure time {e}");
            }
        }

        if let Some(gain_db) = config.gain_db {
            if let Ok(available) = camera.is_gain_auto_available() {
                if available {
                    if let Err(e) = camera.set_gain_auto(aravis::Auto::Off) {
                        panic!("Failed to disable auto gain {e}");
                    }
                }
            }
            if let Err(e) = camera.set_gain(gain_db) {
                panic!("Failed to set gain {e}");
            }
        }

        // Need to set this last so we do not overwrite the configurations.
        if let Some(trigger) = config.trigger {
            if let Err(e) = camera.set_trigger(trigger.into()) {
                panic!("Failed to set acquisition trigger {e:?}")
            }
        }

        if let Some(auto_packet_size) = config.auto_packet_size {
            if auto_packet_size {
                if let Err(e) = camera.gv_auto_packet_size() {
                    panic!("Failed to set auto streaming packet size (MTU) {e:?}")
                }
            }
        }
        camera
    }

    /// Open the stream, queue the first buffer and start acquisition.
    /// The capture loop calls this once; each still is then pulled with
    /// [`PetriCamera::grab_still`] against the same stream so the frame
    /// interval does not pay the stream setup cost.
    pub fn begin_stills(&mut self) {
        let build_buffer = make_buffer_closure(self);

        let stream = self
            .driver
            .create_stream()
            .expect("Unable to create camera stream");
        stream.push_buffer(&build_buffer());

        self.driver
            .start_acquisition()
            .expect("Unable to start camera acquisition");

        self.session = Some(StillStream {
            stream,
            build_buffer: Box::new(build_buffer),
        });
    }

    /// Fire the software trigger and wait for the filled buffer. Every
    /// exit path leaves exactly one empty buffer queued on the stream so
    /// the next cycle can trigger straight away. A bad buffer gets the
    /// stream thread soft-restarted, which has recovered the cameras
    /// seen failing on the bench (light, cabling, network bandwidth).
    pub fn grab_still(&mut self, timeout: Duration) -> Result<DevicePayload, FrameError> {
        let session = self.session.as_ref().ok_or(FrameError::SessionNotStarted)?;

        self.driver
            .software_trigger()
            .map_err(|e| FrameError::Trigger(e.to_string()))?;

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(buffer) = session.stream.try_pop_buffer() {
                // SAFETY: This function assumes the buffer is backed by a leaked box
                #[allow(unsafe_code)]
                let decoded = unsafe { buffer.into_image() };

                return match decoded {
                    Ok(image) => {
                        session.stream.push_buffer(&(session.build_buffer)());
                        Ok(DevicePayload {
                            uuid: Uuid::new_v4(),
                            image,
                            captured_at: Utc::now(),
                            stage_position_id: self.stage_position_id,
                        })
                    }
                    Err(_) => {
                        session.stream.stop_thread(true);
                        session.stream.start_thread();
                        session.stream.push_buffer(&(session.build_buffer)());
                        Err(FrameError::BadFrame)
                    }
                };
            }

            if Instant::now() >= deadline {
                // stop_thread discards the queued buffer, so requeue one.
                session.stream.stop_thread(true);
                session.stream.start_thread();
                session.stream.push_buffer(&(session.build_buffer)());
                return Err(FrameError::Timeout(timeout));
            }

            thread::sleep(Duration::from_millis(5));
        }
    }
}

/// Helper function to create the buffer that is filled by the camera when
/// it is triggered. We create a closure to allow us to wrap the generation
/// process with the region of interest (ROI) specifications applied during
/// construction.
fn make_buffer_closure(camera: &PetriCamera) -> impl Fn() -> aravis::Buffer + Send {
    let (_, _, w, h) = camera.driver.region().expect("Failed to get buffer area");
    let pixel_format = camera
        .driver
        .pixel_format()
        .expect("Failed to get pixel format");

    #[allow(clippy::cast_sign_loss)]
    // SAFETY: w and h should not be negative numbers anyway, could look into
    // changing the data type for the serialisation format to a usize anyway.
    move || aravis::Buffer::new_leaked_image(pixel_format, w as usize, h as usize)
}

/// Device payloads contain data and information that is passed from a
/// device up to the parent component. For the petri camera its the
/// information from the image sensor and the exact time of capture.
#[allow(dead_code)]
pub struct DevicePayload {
    /// Unique identifier for the payload event.
    uuid: Uuid,
    /// Matrix of pixel values from the camera taken during software trigger.
    pub image: DynamicImage,
    /// Image capture time.
    pub captured_at: DateTime<Utc>,
    /// Location of device that took the image.
    stage_position_id: Option<u8>,
}

impl DevicePayload {
    /// Frame dimensions, used for the capture log line.
    pub fn resolution(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}
