use std::path::PathBuf;

use image::{DynamicImage, ImageFormat};
use rapid_sqoa::{Channels, Colorspace, Sqoa};

enum Format {
    /// SQOA, or a QOI stream on input.
    Sqoa,
    Image(image::ImageFormat),
}

fn pick_format(path: &PathBuf) -> Result<Format, ()> {
    match path.extension() {
        Some(ext) => match ext {
            _ if ext == "sqoa" || ext == "qoi" => Ok(Format::Sqoa),
            _ => Ok(Format::Image(ImageFormat::from_extension(ext).ok_or_else(
                || {
                    eprintln!("Failed to pick format based on extension '{:?}'", ext);
                },
            )?)),
        },
        None => {
            eprintln!("Failed to pick format without extension");
            Err(())
        }
    }
}

fn main() -> Result<(), ()> {
    let mut args = std::env::args();

    if args.len() < 2 {
        eprintln!("Usage: sqoaconv <input-path> [<output-path>]");
        eprintln!("Example: sqoaconv images/foo.png images/foo.sqoa");
        return Err(());
    }

    args.next();

    let input = PathBuf::from(args.next().unwrap());
    let input_format = pick_format(&input)?;

    let output = args.next().map(PathBuf::from).unwrap_or_else(|| {
        if let Format::Sqoa = input_format {
            input.with_extension("png")
        } else {
            input.with_extension("sqoa")
        }
    });

    if output.exists() {
        eprintln!("Output path '{}' already occupied", output.display());
        return Err(());
    }

    let output_format = pick_format(&output)?;

    let bytes = std::fs::read(&input)
        .map_err(|err| eprintln!("Failed to read input file '{}'. {:#}", input.display(), err))?;

    let dynamic_image = match input_format {
        Format::Sqoa => {
            let (sqoa, pixels) = Sqoa::decode_alloc(&bytes).map_err(|err| {
                eprintln!("Failed to decode image '{}'. {:#}", input.display(), err)
            })?;

            match sqoa.channels {
                Channels::Mono => DynamicImage::ImageLuma8(
                    image::GrayImage::from_raw(sqoa.width, sqoa.height, pixels).unwrap(),
                ),
                Channels::MonoAlpha => DynamicImage::ImageLumaA8(
                    image::GrayAlphaImage::from_raw(sqoa.width, sqoa.height, pixels).unwrap(),
                ),
                Channels::Rgb => DynamicImage::ImageRgb8(
                    image::RgbImage::from_raw(sqoa.width, sqoa.height, pixels).unwrap(),
                ),
                Channels::Rgba => DynamicImage::ImageRgba8(
                    image::RgbaImage::from_raw(sqoa.width, sqoa.height, pixels).unwrap(),
                ),
                // BGR orders re-decode into their RGB counterparts.
                Channels::Bgr => {
                    let (_, pixels) =
                        Sqoa::decode_alloc_channels(&bytes, Some(Channels::Rgb)).unwrap();
                    DynamicImage::ImageRgb8(
                        image::RgbImage::from_raw(sqoa.width, sqoa.height, pixels).unwrap(),
                    )
                }
                Channels::Bgra => {
                    let (_, pixels) =
                        Sqoa::decode_alloc_channels(&bytes, Some(Channels::Rgba)).unwrap();
                    DynamicImage::ImageRgba8(
                        image::RgbaImage::from_raw(sqoa.width, sqoa.height, pixels).unwrap(),
                    )
                }
            }
        }
        Format::Image(format) => {
            image::load_from_memory_with_format(&bytes, format).map_err(|err| {
                eprintln!(
                    "Failed to open input image '{}'. {:#}",
                    input.display(),
                    err
                )
            })?
        }
    };

    match output_format {
        Format::Sqoa => {
            let (channels, pixels) = match &dynamic_image {
                DynamicImage::ImageLuma8(image) => (Channels::Mono, image.as_raw().clone()),
                DynamicImage::ImageLumaA8(image) => (Channels::MonoAlpha, image.as_raw().clone()),
                DynamicImage::ImageRgb8(image) => (Channels::Rgb, image.as_raw().clone()),
                DynamicImage::ImageRgba8(image) => (Channels::Rgba, image.as_raw().clone()),
                image if image.color().has_alpha() => {
                    (Channels::Rgba, image.to_rgba8().into_raw())
                }
                image => (Channels::Rgb, image.to_rgb8().into_raw()),
            };

            let sqoa = Sqoa {
                width: dynamic_image.width(),
                height: dynamic_image.height(),
                channels,
                colorspace: Colorspace::Srgb,
            };

            let bytes = sqoa.encode_alloc(&pixels).map_err(|err| {
                eprintln!("Failed to encode image '{}'. {:#}", input.display(), err)
            })?;

            std::fs::write(&output, &bytes).map_err(|err| {
                eprintln!(
                    "Failed to write image into output file {}. {:#}",
                    output.display(),
                    err
                )
            })?;
        }

        Format::Image(format) => {
            dynamic_image
                .save_with_format(&output, format)
                .map_err(|err| {
                    eprintln!(
                        "Failed to save image into '{}'. {:#}",
                        output.display(),
                        err
                    )
                })?;
        }
    }

    Ok(())
}
