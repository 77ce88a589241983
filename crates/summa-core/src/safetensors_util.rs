use anyhow::Result;
use memmap2::MmapOptions;
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::fs::File;
use std::path::Path;
use tch::{nn, Device, Kind, Tensor};

/// Load safetensors weights into an existing VarStore, matching by name.
pub fn load_safetensors<P: AsRef<Path>>(vs: &mut nn::VarStore, path: P) -> Result<()> {
    let file = File::open(path)?;
    let buffer = unsafe { MmapOptions::new().map(&file)? };
    let tensors = SafeTensors::deserialize(&buffer)?;

    let mut variables = vs.variables();
    let device = vs.device();

    for (name, view) in tensors.tensors() {
        if let Some(var) = variables.get_mut(&name) {
            let shape: Vec<i64> = view.shape().iter().map(|&x| x as i64).collect();
            let kind = match view.dtype() {
                Dtype::F32 => Kind::Float,
                Dtype::F16 => Kind::Half,
                Dtype::BF16 => Kind::BFloat16,
                _ => return Err(anyhow::anyhow!("Unsupported dtype: {:?}", view.dtype())),
            };

            let data = view.data();
            let tch_tensor = Tensor::from_data_size(data, &shape, kind).to_device(device);

            tch::no_grad(|| {
                var.copy_(&tch_tensor);
            });
            log::debug!("loaded tensor {}", name);
        } else {
            log::warn!("tensor {} present in file but not in model", name);
        }
    }

    Ok(())
}

/// A tensor lifted out of tch as F32 little-endian bytes, ready to be
/// written as a safetensors view.
pub struct OwnedTensorData {
    pub shape: Vec<usize>,
    pub bytes: Vec<u8>,
}

impl OwnedTensorData {
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}

pub fn tensor_data(tensor: &Tensor) -> Result<OwnedTensorData> {
    let t = tensor
        .to_kind(Kind::Float)
        .to_device(Device::Cpu)
        .contiguous();
    let numel = t.numel();
    let mut values = vec![0f32; numel];
    t.copy_data(&mut values, numel);

    let mut bytes = Vec::with_capacity(numel * 4);
    for v in &values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    let shape = t.size().iter().map(|&d| d as usize).collect();

    Ok(OwnedTensorData { shape, bytes })
}

/// Write named tensors to a single safetensors file.
pub fn write_safetensors<P: AsRef<Path>>(entries: &[(String, OwnedTensorData)], path: P) -> Result<()> {
    let mut views = Vec::with_capacity(entries.len());
    for (name, data) in entries {
        let view = TensorView::new(Dtype::F32, data.shape.clone(), &data.bytes)?;
        views.push((name.clone(), view));
    }
    safetensors::serialize_to_file(views, &None, path.as_ref())?;
    Ok(())
}
