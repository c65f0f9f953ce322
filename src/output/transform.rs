//! Parameter maps resampled into structural space.

use indexmap::IndexMap;

use crate::data::image::Image;
use crate::error::AppError;
use crate::output::native::NativeOutput;
use crate::output::register::{Registrar, Registration};
use crate::workspace::Workspace;

pub const STRUC_DIR: &str = "output/struc";

#[derive(Debug, Clone, Default)]
pub struct TransformedOutput {
    pub maps: IndexMap<String, Image>,
}

/// Apply `registration` to every native map. Without a registration nothing is written.
pub fn output_trans(
    wsp: &mut Workspace,
    registrar: &dyn Registrar,
    native: &NativeOutput,
    registration: Option<&Registration>,
) -> Result<TransformedOutput, AppError> {
    let Some(registration) = registration else {
        wsp.log.write("\nNo registration available, transformed output skipped\n");
        return Ok(TransformedOutput::default());
    };

    wsp.log.write("\nGenerating structural space output\n");
    let mut maps = IndexMap::new();
    for (name, image) in &native.maps {
        let resampled = registrar.apply(image, registration, &mut wsp.log)?;
        if let Some(save) = &wsp.savedir {
            save.save_image(STRUC_DIR, name, &resampled)?;
        }
        wsp.log.write(&format!("  - {name}\n"));
        maps.insert(name.clone(), resampled);
    }
    Ok(TransformedOutput { maps })
}
