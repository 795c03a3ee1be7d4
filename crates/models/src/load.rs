use std::path::Path;

use serde::de::DeserializeOwned;

use crate::Error;

/// Read and parse one YAML configuration file. A missing file parses as the
/// model's default; a world-writeable file is refused outright.
pub fn load_file<T>(path: &Path) -> Result<T, Error>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    check_permissions(path)?;

    let text = std::fs::read_to_string(path).map_err(|err| Error::Read {
        path: path.display().to_string(),
        err,
    })?;
    if text.trim().is_empty() {
        return Ok(T::default());
    }
    serde_yaml::from_str(&text).map_err(|err| Error::Parse {
        path: path.display().to_string(),
        err,
    })
}

#[cfg(unix)]
fn check_permissions(path: &Path) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;

    let meta = std::fs::metadata(path).map_err(|err| Error::Read {
        path: path.display().to_string(),
        err,
    })?;
    if meta.permissions().mode() & 0o002 != 0 {
        return Err(Error::WorldWriteable(path.display().to_string()));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_permissions(_path: &Path) -> Result<(), Error> {
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{InitFile, SchemaFile};

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let init: InitFile = load_file(&dir.path().join("init.yaml")).unwrap();
        assert!(init.shortcuts.is_empty());
    }

    #[test]
    fn empty_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hr.yaml");
        std::fs::write(&path, "\n").unwrap();
        let file: SchemaFile = load_file(&path).unwrap();
        assert!(file.resources.is_empty());
    }

    #[test]
    fn parse_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hr.yaml");
        std::fs::write(&path, "resources: {not: a list}").unwrap();
        let err = load_file::<SchemaFile>(&path).unwrap_err();
        assert!(err.to_string().contains("hr.yaml"));
    }

    #[cfg(unix)]
    #[test]
    fn world_writeable_refused() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hr.yaml");
        std::fs::write(&path, "resources: []").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o666)).unwrap();
        let err = load_file::<SchemaFile>(&path).unwrap_err();
        assert!(err.to_string().ends_with("is world writeable, refusing to run"));
    }
}
