use aravis::PixelFormat;
use serde::{de::Visitor, Deserialize, Serialize, Serializer};

/// Wrapper type for implementing serde for pixel format
/// configuration. The rig's sensor is monochrome, with the
/// bayer format kept for the colour camera used on the bench.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct CameraPixelFormat(pub PixelFormat);

impl Serialize for CameraPixelFormat {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.0 {
            PixelFormat::MONO_8 => serializer.serialize_unit_variant("PixelFormat", 0, "MONO_8"),
            PixelFormat::BAYER_RG_8 => {
                serializer.serialize_unit_variant("PixelFormat", 1, "BAYER_RG_8")
            }
            _ => panic!("Un configured pixel format"),
        }
    }
}

impl<'de> Deserialize<'de> for CameraPixelFormat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(PixelFormatVisitor {})
    }
}

/// Wrapper type for serde implementation.
pub struct PixelFormatVisitor {}

impl<'de> Visitor<'de> for PixelFormatVisitor {
    type Value = CameraPixelFormat;

    fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("Could not deserialise CameraPixelFormat")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        match v {
            "MONO_8" => Ok(CameraPixelFormat(PixelFormat::MONO_8)),
            "BAYER_RG_8" => Ok(CameraPixelFormat(PixelFormat::BAYER_RG_8)),
            _ => Err(serde::de::Error::custom("Unknown pixel format {v:?}")),
        }
    }
}

/// Region of interest to select from within a camera frame.
/// The culture dish does not fill the sensor, so cropping to
/// the dish keeps the uploads small on the incubator's wireless
/// link.
#[derive(Deserialize, Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct Roi {
    /// X offset from upper left of the image.
    pub x: i32,
    /// y offset from upper left of the image.
    pub y: i32,
    /// Width in x.
    pub w: i32,
    /// Height in y.
    pub h: i32,
}
