//! Python bindings

use crate::core::params;
use crate::scene::Sentinel1Scene;
use crate::types::{ArdError, ProductType};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use std::path::{Path, PathBuf};

fn to_py_err(err: ArdError) -> PyErr {
    match err {
        ArdError::InvalidScene(_) | ArdError::InvalidParameters(_) => PyValueError::new_err(err.to_string()),
        other => PyRuntimeError::new_err(other.to_string()),
    }
}

/// Python wrapper for Sentinel1Scene
#[pyclass(name = "Sentinel1Scene")]
struct PyScene {
    inner: Sentinel1Scene,
}

#[pymethods]
impl PyScene {
    #[new]
    fn new(scene_id: &str) -> PyResult<Self> {
        let inner = Sentinel1Scene::new(scene_id).map_err(to_py_err)?;
        Ok(PyScene { inner })
    }

    #[getter]
    fn scene_id(&self) -> String {
        self.inner.scene_id.clone()
    }

    #[getter]
    fn start_date(&self) -> String {
        self.inner.start_date.clone()
    }

    #[getter]
    fn rel_orbit(&self) -> u32 {
        self.inner.rel_orbit
    }

    fn info(&self) -> Vec<(String, String)> {
        self.inner
            .info()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    fn download_path(&self, download_dir: PathBuf) -> PathBuf {
        self.inner.download_path(&download_dir)
    }

    #[pyo3(signature = (download_dir, data_mount=None))]
    fn get_path(&self, download_dir: PathBuf, data_mount: Option<PathBuf>) -> PyResult<PathBuf> {
        self.inner
            .get_path(&download_dir, data_mount.as_deref().map(Path::new))
            .map_err(to_py_err)
    }

    fn asf_url(&self) -> String {
        self.inner.asf_url()
    }

    #[staticmethod]
    fn scihub_url(apihub: &str, uuid: &str) -> String {
        Sentinel1Scene::scihub_url(apihub, uuid)
    }

    fn __str__(&self) -> String {
        self.inner.to_string()
    }

    fn __repr__(&self) -> String {
        format!("Sentinel1Scene('{}')", self.inner.scene_id)
    }
}

/// JSON of an ARD preset
#[pyfunction]
fn ard_template(product_type: &str, ard_type: &str) -> PyResult<String> {
    let product_type: ProductType = product_type.parse().map_err(to_py_err)?;
    params::template_json(product_type, ard_type)
        .map(str::to_string)
        .map_err(to_py_err)
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyScene>()?;
    m.add_function(wrap_pyfunction!(ard_template, m)?)?;
    Ok(())
}
