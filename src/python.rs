use crate::compress::DualSlopeCompress;
use crate::errors::{LrModelError, LrfError};
use crate::lr_model::LrModel;
use crate::lrf::{AxialLrf, Lrf, LrfData};
use crate::reconstructor::{RecResult, ReconstructorConfig, reconstruct_events};
use ndarray::{Array1, Array2};
use numpy::IntoPyArray; // converting to python data types
use numpy::PyArrayMethods; // used in to convert python data into ndarray
use numpy::{PyArray1, PyArray2};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::path::Path;

impl From<LrModelError> for PyErr {
    fn from(error: LrModelError) -> PyErr {
        return PyValueError::new_err(error.to_string());
    }
}

impl From<LrfError> for PyErr {
    fn from(error: LrfError) -> PyErr {
        return PyValueError::new_err(error.to_string());
    }
}

/// Samples `[x, y, 0, amplitude]` from three numpy vectors of equal length
fn lrf_data_from_numpy(x: &Bound<'_, PyArray1<f64>>, y: &Bound<'_, PyArray1<f64>>, amplitude: &Bound<'_, PyArray1<f64>>) -> PyResult<Vec<LrfData>> {
    let x_ndarray: Array1<f64> = Array1::from(unsafe { x.as_array() }.to_vec());
    let y_ndarray: Array1<f64> = Array1::from(unsafe { y.as_array() }.to_vec());
    let amplitude_ndarray: Array1<f64> = Array1::from(unsafe { amplitude.as_array() }.to_vec());
    let n_samples: usize = x_ndarray.len();
    if y_ndarray.len() != n_samples || amplitude_ndarray.len() != n_samples {
        return Err(PyValueError::new_err("x, y and amplitude must have the same length"));
    }

    let data: Vec<LrfData> = (0..n_samples)
        .map(|i_sample: usize| [x_ndarray[i_sample], y_ndarray[i_sample], 0.0, amplitude_ndarray[i_sample]])
        .collect();
    return Ok(data);
}

/// Python handle on a detector model
#[pyclass(name = "LrModel")]
pub struct PyLrModel {
    pub model: LrModel,
}

/// Python accessible methods
#[pymethods]
impl PyLrModel {
    #[new]
    pub fn new(n_sensors: usize) -> Self {
        Self { model: LrModel::new(n_sensors) }
    }

    /// Axial LRF cloned for every sensor and group created afterwards
    #[pyo3(signature = (rmax, nint, k=None, r0=None, lam=None, non_negative=true, non_increasing=true, flat_top=true))]
    pub fn set_default_axial_lrf(
        &mut self,
        rmax: f64,
        nint: usize,
        k: Option<f64>,
        r0: Option<f64>,
        lam: Option<f64>,
        non_negative: bool,
        non_increasing: bool,
        flat_top: bool,
    ) -> PyResult<()> {
        let mut lrf: AxialLrf = AxialLrf::new(rmax, nint)?;
        if let (Some(k), Some(r0), Some(lam)) = (k, r0, lam) {
            lrf.set_compression(Some(Box::new(DualSlopeCompress::new(k, r0, lam)?)))?;
        }
        lrf.set_non_negative(non_negative);
        lrf.set_non_increasing(non_increasing);
        lrf.set_flat_top(flat_top);
        self.model.set_default_lrf(Some(Box::new(lrf)));
        return Ok(());
    }

    pub fn add_sensor(&mut self, id: usize, x: f64, y: f64) -> PyResult<()> {
        self.model.add_sensor(id, x, y)?;
        return Ok(());
    }

    pub fn set_gain(&mut self, id: usize, gain: f64) -> PyResult<()> {
        self.model.set_gain(id, gain)?;
        return Ok(());
    }

    pub fn get_sensor_count(&self) -> usize {
        return self.model.get_sensor_count();
    }

    pub fn get_group_count(&self) -> usize {
        return self.model.get_group_count();
    }

    pub fn group_ids(&self) -> Vec<usize> {
        return self.model.group_ids();
    }

    pub fn group_members(&self, gid: usize) -> PyResult<Vec<usize>> {
        return Ok(self.model.group_members(gid)?.iter().copied().collect());
    }

    /// Symmetry grouping, `kind` is one of "common", "radius", "rectangle", "square", "hexagon"
    pub fn make_groups(&mut self, kind: &str) -> PyResult<Vec<usize>> {
        let group_ids: Vec<usize> = match kind {
            "common" => self.model.make_groups_common()?,
            "radius" => self.model.make_groups_by_radius()?,
            "rectangle" => self.model.make_groups_rectangle()?,
            "square" => self.model.make_groups_square()?,
            "hexagon" => self.model.make_groups_hexagon()?,
            _ => return Err(PyValueError::new_err(format!("unknown grouping '{}'", kind))),
        };
        return Ok(group_ids);
    }

    pub fn make_groups_ngon(&mut self, n: usize) -> PyResult<Vec<usize>> {
        return Ok(self.model.make_groups_ngon(n)?);
    }

    /// Accumulate flood samples of sensor `id`, positions in the world frame
    pub fn add_fit_data(
        &mut self,
        id: usize,
        x: &Bound<'_, PyArray1<f64>>,
        y: &Bound<'_, PyArray1<f64>>,
        amplitude: &Bound<'_, PyArray1<f64>>,
    ) -> PyResult<()> {
        let data: Vec<LrfData> = lrf_data_from_numpy(x, y, amplitude)?;
        self.model.add_fit_data(id, &data)?;
        return Ok(());
    }

    pub fn fit_group(&mut self, gid: usize) -> PyResult<()> {
        self.model.fit_group(gid)?;
        return Ok(());
    }

    pub fn fit_sensor(&mut self, id: usize) -> PyResult<()> {
        self.model.fit_sensor(id)?;
        return Ok(());
    }

    /// Expected signal of every sensor for a unit energy event at `(x, y)`
    pub fn eval(&self, x: f64, y: f64, py: Python) -> PyResult<Py<PyArray1<f64>>> {
        let pos: [f64; 3] = [x, y, 0.0];
        let n_sensors: usize = self.model.get_sensor_count();
        let mut signals: Array1<f64> = Array1::zeros(n_sensors);
        for id in 0..n_sensors {
            signals[id] = self.model.eval(id, &pos)?;
        }
        return Ok(signals.into_pyarray(py).into());
    }

    pub fn to_json_string(&self) -> String {
        return self.model.to_json_string();
    }

    #[staticmethod]
    pub fn from_json_string(json_str: &str) -> PyResult<Self> {
        return Ok(Self {
            model: LrModel::from_json_str(json_str)?,
        });
    }

    pub fn save_json(&self, path: &str) -> PyResult<()> {
        self.model.save_json(Path::new(path))?;
        return Ok(());
    }

    #[staticmethod]
    pub fn load_json(path: &str) -> PyResult<Self> {
        return Ok(Self {
            model: LrModel::load_json(Path::new(path))?,
        });
    }

    /// Print to screen, to be used within Python
    fn __repr__(&self) -> String {
        let version: &str = env!("CARGO_PKG_VERSION");

        let mut string_output = String::from("╔═════════════════════════════════════════════════════════════════════════════╗\n");
        string_output += &format!("║  {:<74} ║\n", "<lrmodel_rs.LrModel>");
        string_output += &format!("║  {:<74} ║\n", version);
        string_output += &format!("║  {:<74} ║\n", format!("n_sensors = {}", self.model.get_sensor_count()));
        string_output += &format!("║  {:<74} ║\n", format!("n_groups = {}", self.model.get_group_count()));
        string_output.push_str("╚═════════════════════════════════════════════════════════════════════════════╝");

        return string_output;
    }
}

/// Reconstruct a batch of events
///
/// # Arguments
/// - `signals`: raw amplitudes, shape = [n_events, n_sensors]
/// - `saturated`: saturation flags, shape = [n_events, n_sensors]
/// - `config_json`: reconstruction settings, missing fields keep their defaults
///
/// # Returns
/// A dict of numpy arrays with one entry per event
#[pyfunction]
#[pyo3(name = "reconstruct_events", signature = (model, signals, saturated=None, config_json=None))]
fn reconstruct_events_py<'py>(
    py: Python<'py>,
    model: &PyLrModel,
    signals: &Bound<'py, PyArray2<f64>>,
    saturated: Option<&Bound<'py, PyArray2<bool>>>,
    config_json: Option<&str>,
) -> PyResult<Bound<'py, PyDict>> {
    let signals_ndarray: Array2<f64> = unsafe { signals.as_array() }.to_owned();
    let saturated_ndarray: Option<Array2<bool>> = saturated.map(|flags: &Bound<'py, PyArray2<bool>>| unsafe { flags.as_array() }.to_owned());
    let config: ReconstructorConfig = match config_json {
        Some(json_str) => ReconstructorConfig::from_json_str(json_str)?,
        None => ReconstructorConfig::default(),
    };

    let results: Vec<RecResult> = py.allow_threads(|| reconstruct_events(&model.model, &config, &signals_ndarray, saturated_ndarray.as_ref()))?;

    let column = |value: fn(&RecResult) -> f64| -> Array1<f64> { results.iter().map(value).collect() };
    let status: Array1<i32> = results.iter().map(|result: &RecResult| result.status.code()).collect();

    let output: Bound<'py, PyDict> = PyDict::new(py);
    output.set_item("status", status.into_pyarray(py))?;
    output.set_item("x", column(|result| result.x).into_pyarray(py))?;
    output.set_item("y", column(|result| result.y).into_pyarray(py))?;
    output.set_item("e", column(|result| result.e).into_pyarray(py))?;
    output.set_item("guess_x", column(|result| result.guess_x).into_pyarray(py))?;
    output.set_item("guess_y", column(|result| result.guess_y).into_pyarray(py))?;
    output.set_item("guess_e", column(|result| result.guess_e).into_pyarray(py))?;
    output.set_item("chi2_min", column(|result| result.chi2_min).into_pyarray(py))?;
    output.set_item("cov_xx", column(|result| result.cov_xx).into_pyarray(py))?;
    output.set_item("cov_yy", column(|result| result.cov_yy).into_pyarray(py))?;
    output.set_item("cov_xy", column(|result| result.cov_xy).into_pyarray(py))?;

    return Ok(output);
}

/// A Python module implemented in Rust; bindings added here
#[pymodule]
fn lrmodel_rs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyLrModel>()?;
    m.add_function(wrap_pyfunction!(reconstruct_events_py, m)?)?;
    return Ok(());
}
