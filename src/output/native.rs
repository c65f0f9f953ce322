//! Native-space parameter maps.

use indexmap::IndexMap;

use crate::data::image::Image;
use crate::error::AppError;
use crate::fit::multite::MultiTeOutput;
use crate::workspace::Workspace;

pub const NATIVE_DIR: &str = "output/native";

/// Engine output name -> published map name.
pub const NATIVE_MAPS: [(&str, &str); 4] = [
    ("mean_ftiss", "perfusion"),
    ("mean_delttiss", "arrival"),
    ("mean_texch", "texch"),
    ("modelfit", "modelfit"),
];

#[derive(Debug, Clone, Default)]
pub struct NativeOutput {
    pub maps: IndexMap<String, Image>,
}

impl NativeOutput {
    pub fn get(&self, name: &str) -> Option<&Image> {
        self.maps.get(name)
    }

    pub fn perfusion(&self) -> Result<&Image, AppError> {
        self.get("perfusion").ok_or_else(|| {
            AppError::data("No perfusion map in native output (engine produced no mean_ftiss)")
        })
    }
}

/// Publish the multi-TE fit outputs as named native-space maps.
pub fn output_native(wsp: &mut Workspace, multite: &MultiTeOutput) -> Result<NativeOutput, AppError> {
    wsp.log.write("\nGenerating native (ASL) space output\n");

    let mut maps = IndexMap::new();
    for (source, name) in NATIVE_MAPS {
        let Some(image) = multite.finalstep.get(source) else {
            tracing::debug!(source, "engine output not present, skipping");
            continue;
        };
        let mut image = image.clone();
        if let Some(mask) = &wsp.mask {
            apply_mask(&mut image, mask)?;
        }
        if let Some(save) = &wsp.savedir {
            save.save_image(NATIVE_DIR, name, &image)?;
        }
        wsp.log.write(&format!("  - {name}\n"));
        maps.insert(name.to_string(), image);
    }

    Ok(NativeOutput { maps })
}

/// Zero every voxel outside `mask`, in every volume.
fn apply_mask(image: &mut Image, mask: &Image) -> Result<(), AppError> {
    if !image.same_grid(mask) {
        return Err(AppError::data(format!(
            "Mask grid {:?} does not match output grid {:?}",
            mask.dims, image.dims
        )));
    }
    let inside = mask.volume(0);
    let nvox = image.nvox();
    for vol in image.data.chunks_mut(nvox) {
        for (v, m) in vol.iter_mut().zip(inside) {
            if *m <= 0.0 {
                *v = 0.0;
            }
        }
    }
    Ok(())
}
