use crate::{
    config::TrainingConfig,
    dataset::Dataset,
    error::{Error, Result},
    loss::Loss,
    loss_history,
    models::{MNIST_PIXELS, MNIST_SIDE},
    network::Network,
    optimizer::Adam,
    session::{Accuracy, TrainingSession},
};
use flate2::read::GzDecoder;
use itertools::Itertools;
use log::{debug, info};
use ndarray::Array2;
use std::{
    env,
    fs::File,
    io::{self, BufWriter, Read},
    path::{Path, PathBuf},
};

/// Environment variable that overrides where the MNIST files are looked up.
pub const DATA_DIR_ENV: &str = "MNIST_DATA_DIR";
pub const DEFAULT_DATA_DIR: &str = "data";

pub const TRAIN_IMAGES: &str = "train-images-idx3-ubyte.gz";
pub const TRAIN_LABELS: &str = "train-labels-idx1-ubyte.gz";
pub const TEST_IMAGES: &str = "t10k-images-idx3-ubyte.gz";
pub const TEST_LABELS: &str = "t10k-labels-idx1-ubyte.gz";

const IMAGE_MAGIC: u32 = 2051;
const LABEL_MAGIC: u32 = 2049;

pub fn data_dir() -> PathBuf {
    env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

/// Makes sure all four MNIST files exist under `dir`. There is no network client here, so a
/// missing file is reported rather than fetched.
pub fn ensure_present(dir: &Path) -> Result<()> {
    for name in [TRAIN_IMAGES, TRAIN_LABELS, TEST_IMAGES, TEST_LABELS] {
        let path = dir.join(name);
        if !path.is_file() {
            return Err(Error::DatasetUnavailable {
                source: io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{name} is missing; place the gzipped MNIST IDX files in this directory"),
                ),
                path,
            });
        }
    }
    Ok(())
}

pub struct MnistData {
    pub training_data: Dataset,
    pub test_data: Dataset,
}

impl MnistData {
    pub fn load(dir: &Path) -> Result<MnistData> {
        ensure_present(dir)?;

        let training_data = read_split(dir, TRAIN_IMAGES, TRAIN_LABELS)?;
        let test_data = read_split(dir, TEST_IMAGES, TEST_LABELS)?;
        debug!(
            "loaded {} training and {} test images from {}",
            training_data.inputs().nrows(),
            test_data.inputs().nrows(),
            dir.display()
        );

        Ok(MnistData {
            training_data,
            test_data,
        })
    }
}

/// Trains `network` on the MNIST training split with Adam and cross-entropy, then reports its
/// accuracy on the test split. Per-step losses go to the loss-history file when one is configured.
pub fn train_and_evaluate(
    network: Network,
    mnist_data: &MnistData,
    config: &TrainingConfig,
) -> Result<Accuracy> {
    let mut rng = config.rng();
    let optimizer = Adam::new(network.parameters(), config.learning_rate)?;
    let mut session = TrainingSession::new(network, optimizer, Loss::CrossEntropy)?;
    if let Some(path) = loss_history::history_path() {
        info!("recording loss history to {}", path.display());
        session = session.with_loss_history(BufWriter::new(File::create(path)?));
    }

    session.train(&mnist_data.training_data, config, &mut rng)?;
    info!("Finished Training");

    session.evaluate(&mnist_data.test_data, config.batch_size)
}

fn read_split(dir: &Path, images: &str, labels: &str) -> Result<Dataset> {
    let image_path = dir.join(images);
    let label_path = dir.join(labels);
    let image_bytes = read_bytes(&image_path)?;
    let label_bytes = read_bytes(&label_path)?;
    images_and_labels_to_data(&image_path, image_bytes, label_bytes)
}

// Reads and gunzips a whole file.
fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    let unavailable = |source| Error::DatasetUnavailable {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(unavailable)?;
    let mut bytes = Vec::new();
    GzDecoder::new(file)
        .read_to_end(&mut bytes)
        .map_err(unavailable)?;
    Ok(bytes)
}

/// Turns raw IDX image and label bytes into a dataset with one 784-pixel row per image, scaled to
/// [0, 1], labelled with its digit. `path` is only used in error messages.
pub fn images_and_labels_to_data(
    path: &Path,
    image_bytes: Vec<u8>,
    label_bytes: Vec<u8>,
) -> Result<Dataset> {
    let malformed = |reason: String| Error::MalformedDataset {
        path: path.to_path_buf(),
        reason,
    };

    let mut image_bytes_iter = image_bytes.into_iter();
    let mut label_bytes_iter = label_bytes.into_iter();

    // The image header is four big-endian u32s: magic number, image count, rows, columns. The
    // label header is two: magic number and label count.
    let image_header = read_header::<4>(&mut image_bytes_iter)
        .ok_or_else(|| malformed("truncated image header".to_owned()))?;
    let label_header = read_header::<2>(&mut label_bytes_iter)
        .ok_or_else(|| malformed("truncated label header".to_owned()))?;

    let [image_magic, images, rows, columns] = image_header;
    let [label_magic, labels] = label_header;

    if image_magic != IMAGE_MAGIC || label_magic != LABEL_MAGIC {
        return Err(malformed(format!(
            "magic numbers {image_magic}/{label_magic}, expected {IMAGE_MAGIC}/{LABEL_MAGIC}"
        )));
    }
    if images != labels {
        return Err(malformed(format!("{images} images but {labels} labels")));
    }
    if (rows as usize, columns as usize) != (MNIST_SIDE, MNIST_SIDE) {
        return Err(malformed(format!(
            "images are {rows}x{columns}, expected {MNIST_SIDE}x{MNIST_SIDE}"
        )));
    }

    // The header counts are only trusted once the payload is known to be that long.
    let count = images as usize;
    let expected_pixels = count
        .checked_mul(MNIST_PIXELS)
        .ok_or_else(|| malformed(format!("{count} images do not fit in memory")))?;
    if image_bytes_iter.len() != expected_pixels {
        return Err(malformed(format!(
            "expected {expected_pixels} pixel bytes for {count} images, found {}",
            image_bytes_iter.len()
        )));
    }
    if label_bytes_iter.len() != count {
        return Err(malformed(format!(
            "expected {count} label bytes, found {}",
            label_bytes_iter.len()
        )));
    }

    let mut pixels = Vec::with_capacity(expected_pixels);
    let mut digits = Vec::with_capacity(count);

    // Both iterators have had their headers consumed, so what's left is data. Chunk the image
    // bytes into one 784-byte image at a time and pair each chunk with its label byte.
    for (image_chunk, label) in image_bytes_iter
        .chunks(MNIST_PIXELS)
        .into_iter()
        .zip(label_bytes_iter)
    {
        pixels.extend(image_chunk.map(|value| value as f64 / 255.0));
        digits.push(label as usize);
    }

    let inputs = Array2::from_shape_vec((count, MNIST_PIXELS), pixels)
        .map_err(|error| malformed(error.to_string()))?;
    Dataset::classification(inputs, digits)
}

fn read_header<const N: usize>(bytes: &mut impl Iterator<Item = u8>) -> Option<[u32; N]> {
    let mut header = [0u32; N];
    for field in &mut header {
        let chunk: Vec<u8> = bytes.by_ref().take(4).collect();
        *field = u32::from_be_bytes(chunk.try_into().ok()?);
    }
    Some(header)
}
