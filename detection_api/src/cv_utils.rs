use crate::bounding_box::BoundingBoxWithLabels;
use image::RgbImage;
use opencv::{
    core::{Mat, Point, Rect, Scalar, Vector},
    imgcodecs, imgproc,
    prelude::*,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CvUtilsError {
    #[error("Failed to encode frame: {0}")]
    EncodeFrameFailed(opencv::Error),
    #[error("OpenCV error: {0}")]
    OpenCvError(opencv::Error),
    #[error("OpenCV decode error: {0}")]
    OpenCvDecodeError(opencv::Error),
    #[error("Bytes are not a decodable image")]
    EmptyImage,
    #[error("Unexpected pixel layout: {0}")]
    PixelLayout(String),
}

impl From<opencv::Error> for CvUtilsError {
    fn from(err: opencv::Error) -> Self {
        CvUtilsError::OpenCvError(err)
    }
}

/// A decoded 3-channel BGR image.
pub struct CvImage {
    pub mat: Mat,
}

impl CvImage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CvUtilsError> {
        let mat = imgcodecs::imdecode(&Vector::<u8>::from_slice(bytes), imgcodecs::IMREAD_COLOR)
            .map_err(CvUtilsError::OpenCvDecodeError)?;
        if mat.empty() {
            return Err(CvUtilsError::EmptyImage);
        }
        Ok(Self { mat })
    }

    pub fn width(&self) -> u32 {
        self.mat.cols().max(0) as u32
    }

    pub fn height(&self) -> u32 {
        self.mat.rows().max(0) as u32
    }

    /// Copies the BGR pixels into an RGB buffer for the model.
    pub fn to_rgb_image(&self) -> Result<RgbImage, CvUtilsError> {
        if self.mat.channels() != 3 {
            return Err(CvUtilsError::PixelLayout(format!(
                "expected 3 channels, got {}",
                self.mat.channels()
            )));
        }
        let continuous;
        let mat = if self.mat.is_continuous() {
            &self.mat
        } else {
            continuous = self.mat.try_clone()?;
            &continuous
        };

        let bgr = mat.data_bytes()?;
        let mut rgb = Vec::with_capacity(bgr.len());
        for chunk in bgr.chunks_exact(3) {
            rgb.extend_from_slice(&[chunk[2], chunk[1], chunk[0]]);
        }

        RgbImage::from_raw(self.width(), self.height(), rgb).ok_or_else(|| {
            CvUtilsError::PixelLayout("pixel buffer does not match dimensions".to_string())
        })
    }

    pub fn to_jpg(&self) -> Result<Vec<u8>, CvUtilsError> {
        let mut buf = Vector::<u8>::new();
        imgcodecs::imencode(".jpg", &self.mat, &mut buf, &Vector::new())
            .map_err(CvUtilsError::EncodeFrameFailed)?;
        Ok(buf.into())
    }

    pub fn annotate(
        &mut self,
        bboxes: &[BoundingBoxWithLabels],
    ) -> Result<&mut Self, CvUtilsError> {
        for bbox in bboxes {
            let x1 = bbox.x1 as i32;
            let y1 = bbox.y1 as i32;
            let x2 = bbox.x2 as i32;
            let y2 = bbox.y2 as i32;
            let label = format!("{} {:.2}", bbox.class_label, bbox.confidence);

            let color = Scalar::new(bbox.blue as f64, bbox.green as f64, bbox.red as f64, 0.0);

            imgproc::rectangle(
                &mut self.mat,
                Rect::new(x1, y1, x2 - x1, y2 - y1),
                color,
                2,
                imgproc::LINE_8,
                0,
            )
            .map_err(CvUtilsError::from)?;

            // keep the caption inside the frame for boxes touching the top edge
            let text_y = if y1 - 5 < 12 { y1 + 15 } else { y1 - 5 };
            imgproc::put_text(
                &mut self.mat,
                &label,
                Point::new(x1, text_y),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.5,
                color,
                1,
                imgproc::LINE_AA,
                false,
            )
            .map_err(CvUtilsError::from)?;
        }
        Ok(self)
    }
}
