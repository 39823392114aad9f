use crate::devices::{
    hardware::camera::{FrameError, PetriCamera},
    software::{interval::IntervalTimer, uplink::ImageUplink},
};
use image::{DynamicImage, ImageOutputFormat};
use serde::{Deserialize, Serialize};
use std::{
    ffi::OsStr,
    fs,
    io::Cursor,
    path::{Path, PathBuf},
    time::Duration,
};
use strum_macros::IntoStaticStr;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// How often the controller polls the interval timer between cycles.
const CAPTURE_POLL_MS: u64 = 50;

/// As with all elements in the petri system, a configuration struct
/// is consumed to create the necessary component, which in turn
/// controls the devices that are composed together.
#[derive(Deserialize, Serialize, PartialEq, Eq, Debug)]
pub struct CaptureRigConfig {
    /// Id of the microscope rig the component is attached to.
    microscope_id: u8,
    /// Where to store images on disk.
    image_path: String,
    /// Folder under `image_path` for brightfield stills.
    brightfield_dir: String,
    /// Folder under `image_path` for darkfield stills.
    darkfield_dir: String,
    /// Analysis workstation endpoint the stills are POSTed to.
    upload_url: String,
    /// Time between capture cycles; half the illumination pass so the
    /// folder toggle tracks the lit lamp.
    capture_interval_ms: u64,
    /// How long a cycle waits for the triggered frame before giving up.
    frame_timeout_ms: u64,
    /// JPEG encode quality, 1-100.
    jpeg_quality: u8,
    /// Config file used to set up the camera in the component.
    camera_config_file: PathBuf,
}

impl CaptureRigConfig {
    /// Capture rig configuration with the deployed schedule.
    ///
    /// * `microscope_id`: rig ids from [0 - 2]
    /// * `image_path`: parent folder for the stored stills.
    /// * `upload_url`: full URL of the workstation upload route.
    pub fn new(microscope_id: u8, image_path: String, upload_url: String) -> Self {
        Self {
            microscope_id,
            image_path,
            upload_url,
            brightfield_dir: String::from("BF"),
            darkfield_dir: String::from("DF"),
            capture_interval_ms: 150_000,
            frame_timeout_ms: 2_000,
            jpeg_quality: 90,
            camera_config_file: PathBuf::new(),
        }
    }

    /// Add the camera config file to the component, this will be
    /// consumed when the component is created.
    ///
    /// * `filepath`: filepath to the config file.
    pub fn with_camera_config_file<F>(mut self, filepath: F) -> Self
    where
        F: AsRef<OsStr>,
    {
        self.camera_config_file = (&filepath).into();
        self
    }

    /// Build the config by reading a file, this is a helper function.
    ///
    /// * `filepath`: path to config.
    pub fn from_file<F: AsRef<OsStr>>(filepath: F) -> Self {
        let file = Path::new(&filepath);
        if file.is_file() {
            let config_file = config::Config::builder()
                .add_source(config::File::new(
                    &file.to_string_lossy(),
                    config::FileFormat::Yaml,
                ))
                .build()
                .expect("Failed read config");

            config_file
                .try_deserialize::<CaptureRigConfig>()
                .expect("Failed to parse config file into struct")
        } else {
            panic!("Could not locate the config file {:?}", file);
        }
    }
}

/// Which illumination condition a still belongs to. The capture loop
/// does not observe the lamps; the deployment timing guarantees the
/// alternation lines up with the lighting sequence.
#[derive(IntoStaticStr, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    /// Brightfield still.
    Brightfield,
    /// Darkfield still.
    Darkfield,
}

/// Storage slot a finished cycle files its still into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageSlot {
    /// Illumination condition the slot belongs to.
    pub modality: Modality,
    /// Monotonic picture number across both modalities.
    pub index: u32,
}

impl StorageSlot {
    /// File name for the still in this slot.
    pub fn file_name(&self) -> String {
        format!("pic{}.jpg", self.index)
    }
}

/// Strict alternation between the two storage folders plus the shared
/// picture counter. Advancing is the last step of a successful capture,
/// so a failed frame grab leaves the rotation untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageRotation {
    /// Modality the next still will be filed under.
    next: Modality,
    /// Counter for picture number.
    picture_count: u32,
}

impl StorageRotation {
    /// Start a rotation at the brightfield folder and picture zero.
    pub fn new() -> Self {
        Self {
            next: Modality::Brightfield,
            picture_count: 0,
        }
    }

    /// Total stills filed so far.
    pub fn picture_count(&self) -> u32 {
        self.picture_count
    }

    /// Hand out the slot for the current cycle, toggle the folder and
    /// increment the picture count.
    pub fn advance(&mut self) -> StorageSlot {
        let slot = StorageSlot {
            modality: self.next,
            index: self.picture_count,
        };
        self.next = match self.next {
            Modality::Brightfield => Modality::Darkfield,
            Modality::Darkfield => Modality::Brightfield,
        };
        self.picture_count += 1;
        slot
    }
}

impl Default for StorageRotation {
    fn default() -> Self {
        Self::new()
    }
}

/// Failures that abort one capture cycle. Upload and storage problems
/// are logged inside the cycle instead; the frame is already in hand
/// at that point and the rest of the cycle can still do useful work.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The camera produced no usable frame this cycle.
    #[error("frame acquisition failed: {0}")]
    Frame(#[from] FrameError),
    /// The frame could not be encoded for upload and storage.
    #[error("jpeg encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Component that houses the camera and the uplink which are composed
/// to run the timed acquisition loop for one microscope rig.
#[allow(dead_code)]
pub struct CaptureRig {
    /// Unique id of the component.
    uuid: Uuid,
    /// Microscope rig id the component is tied to.
    microscope_id: u8,
    /// The camera device this component manages.
    camera: PetriCamera,
    /// Uplink to the analysis workstation.
    uplink: ImageUplink,
    /// Parent save directory for the stills.
    image_path: String,
    /// Brightfield folder name under `image_path`.
    brightfield_dir: String,
    /// Darkfield folder name under `image_path`.
    darkfield_dir: String,
    /// Time between capture cycles.
    capture_interval: Duration,
    /// Frame wait deadline per cycle.
    frame_timeout: Duration,
    /// JPEG encode quality.
    jpeg_quality: u8,
    /// Folder toggle and picture counter.
    rotation: StorageRotation,
    /// Start-of-interval book-keeping.
    timer: IntervalTimer,
}

impl CaptureRig {
    /// Return the unique id of the capture rig.
    pub fn get_uuid(&self) -> Uuid {
        self.uuid
    }

    /// Generate a new component by consuming a config.
    ///
    /// * `config`: `CaptureRigConfig`
    pub fn new(config: CaptureRigConfig) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            microscope_id: config.microscope_id,
            camera: PetriCamera::from_config_file(&config.camera_config_file),
            uplink: ImageUplink::new(config.upload_url),
            image_path: config.image_path,
            brightfield_dir: config.brightfield_dir,
            darkfield_dir: config.darkfield_dir,
            capture_interval: Duration::from_millis(config.capture_interval_ms),
            frame_timeout: Duration::from_millis(config.frame_timeout_ms),
            jpeg_quality: config.jpeg_quality,
            rotation: StorageRotation::new(),
            timer: IntervalTimer::start_now(),
        }
    }

    /// Generate a new component by consuming the config stored
    /// in a file.
    ///
    /// * `filepath`: filepath to a config.
    pub fn from_config_file<F: AsRef<OsStr>>(filepath: F) -> Self {
        let config = CaptureRigConfig::from_file(filepath);
        Self::new(config)
    }

    /// Storage folder for one modality.
    fn modality_dir(&self, modality: Modality) -> PathBuf {
        let folder = match modality {
            Modality::Brightfield => &self.brightfield_dir,
            Modality::Darkfield => &self.darkfield_dir,
        };
        Path::new(&self.image_path).join(folder)
    }
}

/// Unit struct for controlling the capture rig component.
pub struct CaptureRigController;

impl CaptureRigController {
    /// Start the component. Creates the storage folder pair, opens the
    /// camera session, then runs one sequential cycle per interval;
    /// the loop never exits.
    ///
    /// * `rig`: consumed component.
    pub async fn start(mut rig: CaptureRig) {
        fs::create_dir_all(rig.modality_dir(Modality::Brightfield))
            .expect("Failed to create brightfield storage directory");
        fs::create_dir_all(rig.modality_dir(Modality::Darkfield))
            .expect("Failed to create darkfield storage directory");

        rig.camera.begin_stills();
        rig.timer.restart();
        info!(
            "capture loop armed on microscope {}, interval {:?}",
            rig.microscope_id, rig.capture_interval
        );

        loop {
            if rig.timer.period_elapsed(rig.capture_interval) {
                if let Err(e) = Self::run_cycle(&mut rig).await {
                    warn!("capture cycle skipped: {e}");
                }
            }
            tokio::time::sleep(Duration::from_millis(CAPTURE_POLL_MS)).await;
        }
    }

    /// One capture cycle: grab a still, encode it once, upload the
    /// bytes, file the same bytes into the alternating folder. Upload
    /// and storage failures are logged here and the cycle carries on;
    /// only a missing frame aborts before the rotation advances.
    async fn run_cycle(rig: &mut CaptureRig) -> Result<(), CaptureError> {
        let payload = rig.camera.grab_still(rig.frame_timeout)?;
        let jpeg = encode_jpeg(&payload.image, rig.jpeg_quality)?;

        match rig.uplink.send_jpeg(&jpeg).await {
            Ok(status) if status.is_success() => {
                info!("image uploaded to {}", rig.uplink.endpoint());
            }
            Ok(status) => {
                warn!("upload rejected with status {status}");
            }
            Err(e) => {
                warn!("upload failed: {e}");
            }
        }

        let slot = rig.rotation.advance();
        let path = rig.modality_dir(slot.modality).join(slot.file_name());
        match fs::write(&path, &jpeg) {
            Ok(()) => {
                let (w, h) = payload.resolution();
                info!(
                    "image saved in {}-folder: {} ({w}x{h}, {} bytes)",
                    <&str>::from(slot.modality),
                    path.display(),
                    jpeg.len()
                );
            }
            Err(e) => {
                warn!("failed to open {} for writing: {e}", path.display());
            }
        }
        Ok(())
    }
}

/// Encode a frame once; the same bytes go to the uplink and to disk so
/// the workstation and the card always hold the identical image.
fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Jpeg(quality))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;
    use serial_test::serial;
    use std::fs::OpenOptions;

    #[test]
    fn test_rotation_alternates_strictly() {
        let mut rotation = StorageRotation::new();

        let slots: Vec<StorageSlot> = (0..6).map(|_| rotation.advance()).collect();

        let modalities: Vec<Modality> = slots.iter().map(|s| s.modality).collect();
        assert_eq!(
            modalities,
            vec![
                Modality::Brightfield,
                Modality::Darkfield,
                Modality::Brightfield,
                Modality::Darkfield,
                Modality::Brightfield,
                Modality::Darkfield,
            ],
            "Folder toggle must alternate every cycle"
        );

        let indices: Vec<u32> = slots.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(rotation.picture_count(), 6);
    }

    #[test]
    fn test_slot_file_names_follow_counter() {
        let mut rotation = StorageRotation::new();
        assert_eq!(rotation.advance().file_name(), "pic0.jpg");
        assert_eq!(rotation.advance().file_name(), "pic1.jpg");
        assert_eq!(rotation.advance().file_name(), "pic2.jpg");
    }

    #[test]
    fn test_jpeg_encode_round_trip_dimensions() {
        let image = DynamicImage::new_rgb8(64, 48);
        let jpeg = encode_jpeg(&image, 90).expect("Failed to encode test frame");

        let decoded = image::load_from_memory(&jpeg).expect("Failed to decode test frame");
        assert_eq!(decoded.width(), 64);
        assert_eq!(decoded.height(), 48);
    }

    #[test]
    #[serial]
    fn test_write_component_config_to_file() {
        let config = CaptureRigConfig::new(
            0,
            String::from("./pictures"),
            String::from("http://192.168.4.2:8000/upload"),
        )
        .with_camera_config_file("./config/devices/microscope/camera_0.yaml");

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(Path::new(&format!(
                "{}/config/components/microscope/sensing/capture_rig.yaml",
                env!("CARGO_MANIFEST_DIR")
            )))
            .expect("Faile to open file");
        serde_yaml::to_writer(file, &config).expect("Failed to write yaml");

        let read_config = CaptureRigConfig::from_file(Path::new(&format!(
            "{}/config/components/microscope/sensing/capture_rig.yaml",
            env!("CARGO_MANIFEST_DIR")
        )));
        assert_eq!(config, read_config, "Failed to read write rig config");
    }

    #[cfg_attr(not(feature = "hardware_test"), ignore)]
    #[test]
    #[serial]
    /// Hardware test to check a rig built from the shipped config can
    /// pull one still off the camera.
    fn test_capture_rig_grabs_one_still() {
        let config_file = crate::test_file_path!(
            "/config/components/microscope/sensing/capture_rig.yaml"
        );
        let mut rig = CaptureRig::from_config_file(config_file);

        rig.camera.begin_stills();
        let payload = rig
            .camera
            .grab_still(rig.frame_timeout)
            .expect("Failed to grab a still frame");

        let (w, h) = payload.resolution();
        assert!(w > 0 && h > 0, "Camera returned an empty frame");
    }
}
