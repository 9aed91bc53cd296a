use std::path::Path;

/// Markers the shared poster template must carry. Authoring the template
/// itself happens outside this service; we only substitute.
pub const IMAGE_MARKER: &str = "##_Attendee_Image_##";
pub const NAME_MARKER: &str = "##_Attendee_Name_##";

/// Merge a display name and an uploaded photo into the poster template.
///
/// Substitution is a literal replacement of the first occurrence of each
/// marker. A marker that is missing from the template is silently skipped
/// rather than rejected; the template is a deploy-time artifact and a
/// half-filled poster is easier to diagnose than a refused submission.
///
/// The photo is referenced relative to `uploads_root` because the render
/// engine loads the composed document from a file in that same directory,
/// so a relative `src` resolves locally without any network fetch.
pub fn compose(name: &str, photo_path: &Path, template: &str, uploads_root: &Path) -> String {
    let image_ref = relative_image_ref(photo_path, uploads_root);
    template
        .replacen(IMAGE_MARKER, &image_ref, 1)
        .replacen(NAME_MARKER, name.trim(), 1)
}

fn relative_image_ref(photo_path: &Path, uploads_root: &Path) -> String {
    match photo_path.strip_prefix(uploads_root) {
        Ok(rel) => format!("./{}", rel.display()),
        Err(_) => photo_path.display().to_string(),
    }
}
