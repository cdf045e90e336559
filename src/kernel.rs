//! One compiled kernel plus its bound buffers.
//!
//! Argument slots are assigned inputs first, in bind order, then outputs in
//! the order of the output specification.

use crate::config::Config;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::types::{DataType, Elements};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle of a kernel instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Compiled, nothing bound, never executed.
    Created,
    /// Inputs bound or outputs re-specified since the last execution.
    Configured,
    /// Last execution succeeded and its outputs are readable.
    Executed,
}

/// Per-instance knobs taken from [`Config`].
#[derive(Debug, Clone, Copy)]
pub struct KernelOptions {
    pub execute_timeout: Option<Duration>,
    pub strict_arity: bool,
    pub max_buffer_size: u64,
}

impl Default for KernelOptions {
    fn default() -> Self {
        KernelOptions::from(&Config::default())
    }
}

impl From<&Config> for KernelOptions {
    fn from(config: &Config) -> Self {
        Self {
            execute_timeout: config.execute_timeout,
            strict_arity: config.strict_arity,
            max_buffer_size: config.max_buffer_size,
        }
    }
}

struct OutputBuffer<B> {
    buffer: B,
    size: u64,
    data_type: DataType,
}

/// Serializable view of a kernel instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KernelInfo {
    pub device: String,
    pub data_type: DataType,
    pub entry_point: Option<String>,
    pub state: SessionState,
    pub work_size: usize,
    pub inputs: Vec<usize>,
    pub outputs: Vec<u64>,
    pub outputs_available: bool,
}

pub struct KernelInstance<D: Device> {
    device: Arc<D>,
    data_type: DataType,
    entry_point: Option<String>,
    program: Option<D::Program>,
    inputs: Vec<Elements>,
    output_specs: Vec<u64>,
    outputs: Vec<OutputBuffer<D::Buffer>>,
    work_size: usize,
    state: SessionState,
    options: KernelOptions,
}

impl<D: Device> KernelInstance<D> {
    pub fn new(device: Arc<D>, data_type: DataType, options: KernelOptions) -> Self {
        Self {
            device,
            data_type,
            entry_point: None,
            program: None,
            inputs: Vec::new(),
            output_specs: Vec::new(),
            outputs: Vec::new(),
            work_size: 0,
            state: SessionState::Created,
            options,
        }
    }

    /// Compile `source` and make it the program of this instance.
    ///
    /// A failed compile leaves any previous program in place. A successful
    /// one replaces it and invalidates outputs.
    pub fn compile(&mut self, source: &str, entry_point: &str) -> Result<()> {
        let program = self.device.compile(source, entry_point)?;

        self.program = Some(program);
        self.entry_point = Some(entry_point.to_string());
        self.invalidate_outputs();
        Ok(())
    }

    /// Replace the output specification. The instance becomes `Configured`.
    pub fn set_output_specs(&mut self, sizes: Vec<u64>) -> Result<()> {
        self.init_output_specs(sizes)?;
        self.state = SessionState::Configured;
        Ok(())
    }

    /// Set the output sizes a session is created with, keeping its state.
    pub(crate) fn init_output_specs(&mut self, sizes: Vec<u64>) -> Result<()> {
        if let Some(&size) = sizes.iter().find(|&&s| s > self.options.max_buffer_size) {
            return Err(Error::validation(format!(
                "output of {} bytes exceeds the {} byte buffer limit",
                size, self.options.max_buffer_size
            )));
        }
        if self.options.strict_arity {
            self.check_arity_at_most(self.inputs.len() + sizes.len())?;
        }

        self.output_specs = sizes;
        self.invalidate_outputs();
        Ok(())
    }

    /// Append `elements` as the next input. Returns its argument index.
    pub fn bind_input(&mut self, elements: Elements) -> Result<usize> {
        self.bind_input_at(self.inputs.len(), elements)
    }

    /// Bind `elements` at input slot `index`, replacing what was there.
    ///
    /// `index` equal to the current input count appends. Nothing changes
    /// when the bind is rejected.
    pub fn bind_input_at(&mut self, index: usize, elements: Elements) -> Result<usize> {
        if elements.data_type() != self.data_type {
            return Err(Error::type_mismatch(
                self.data_type,
                elements.data_type().to_string(),
            ));
        }
        if index > self.inputs.len() {
            return Err(Error::validation(format!(
                "input index {} out of range ({} inputs bound)",
                index,
                self.inputs.len()
            )));
        }
        if elements.byte_len() as u64 > self.options.max_buffer_size {
            return Err(Error::validation(format!(
                "input of {} bytes exceeds the {} byte buffer limit",
                elements.byte_len(),
                self.options.max_buffer_size
            )));
        }
        if self.options.strict_arity && index == self.inputs.len() {
            self.check_arity_at_most(self.inputs.len() + 1 + self.output_specs.len())?;
        }

        if index == self.inputs.len() {
            self.inputs.push(elements);
        } else {
            self.inputs[index] = elements;
        }

        self.work_size = self.inputs.iter().map(Elements::len).max().unwrap_or(0);
        self.outputs.clear();
        self.state = SessionState::Configured;
        Ok(index)
    }

    /// Run the program once over `work_size` items.
    ///
    /// Outputs from a previous run are dropped when the attempt starts. On
    /// failure inputs and output specs are kept and no outputs are readable.
    pub fn execute(&mut self) -> Result<()> {
        self.outputs.clear();

        match self.dispatch() {
            Ok(outputs) => {
                self.outputs = outputs;
                self.state = SessionState::Executed;
                Ok(())
            }
            Err(e) => {
                if self.state == SessionState::Executed {
                    self.state = SessionState::Configured;
                }
                Err(e)
            }
        }
    }

    fn dispatch(&self) -> Result<Vec<OutputBuffer<D::Buffer>>> {
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| Error::execution("kernel has no compiled program"))?;
        if self.output_specs.is_empty() {
            return Err(Error::execution("no output buffers specified"));
        }
        if self.options.strict_arity {
            self.check_arity_exact(program)?;
        }

        let work_size = u32::try_from(self.work_size).map_err(|_| {
            Error::execution(format!("work size {} exceeds device range", self.work_size))
        })?;

        let mut args = Vec::with_capacity(self.inputs.len() + self.output_specs.len());
        for input in &self.inputs {
            args.push(self.device.upload(&input.to_bytes())?);
        }
        for &size in &self.output_specs {
            args.push(self.device.allocate(size)?);
        }

        self.device
            .run(program, &mut args, work_size, self.options.execute_timeout)?;

        Ok(args
            .drain(self.inputs.len()..)
            .zip(&self.output_specs)
            .map(|(buffer, &size)| OutputBuffer {
                buffer,
                size,
                data_type: self.data_type,
            })
            .collect())
    }

    /// Raw bytes of output `index` from the last successful execution.
    pub fn read_output_bytes(&self, index: usize) -> Result<Vec<u8>> {
        let output = self.output(index)?;
        let mut bytes = self.device.read(&output.buffer)?;
        bytes.truncate(output.size as usize);
        Ok(bytes)
    }

    /// Output `index` decoded with its stored element type.
    pub fn read_output(&self, index: usize) -> Result<Elements> {
        let data_type = self.output(index)?.data_type;
        Elements::from_bytes(data_type, &self.read_output_bytes(index)?)
    }

    /// Like [`read_output`](Self::read_output), but the caller names the
    /// type it expects.
    pub fn read_output_as(&self, index: usize, data_type: DataType) -> Result<Elements> {
        let stored = self.output(index)?.data_type;
        if stored != data_type {
            return Err(Error::type_mismatch(stored, data_type.to_string()));
        }
        self.read_output(index)
    }

    fn output(&self, index: usize) -> Result<&OutputBuffer<D::Buffer>> {
        if self.outputs.is_empty() {
            return Err(Error::not_found(
                "no outputs available; the kernel has not been executed successfully",
            ));
        }
        self.outputs.get(index).ok_or_else(|| {
            Error::not_found(format!(
                "output index {} out of range ({} outputs)",
                index,
                self.outputs.len()
            ))
        })
    }

    fn invalidate_outputs(&mut self) {
        self.outputs.clear();
        if self.state == SessionState::Executed {
            self.state = SessionState::Configured;
        }
    }

    fn check_arity_at_most(&self, count: usize) -> Result<()> {
        match self.program.as_ref().and_then(|p| self.device.arity(p)) {
            Some(arity) if count > arity => Err(Error::validation(format!(
                "kernel declares {} arguments, {} would be bound",
                arity, count
            ))),
            _ => Ok(()),
        }
    }

    fn check_arity_exact(&self, program: &D::Program) -> Result<()> {
        let bound = self.inputs.len() + self.output_specs.len();
        match self.device.arity(program) {
            Some(arity) if arity != bound => Err(Error::validation(format!(
                "kernel declares {} arguments, {} are bound",
                arity, bound
            ))),
            _ => Ok(()),
        }
    }

    pub fn info(&self) -> KernelInfo {
        KernelInfo {
            device: self.device.name(),
            data_type: self.data_type,
            entry_point: self.entry_point.clone(),
            state: self.state,
            work_size: self.work_size,
            inputs: self.inputs.iter().map(Elements::len).collect(),
            outputs: self.output_specs.clone(),
            outputs_available: !self.outputs.is_empty(),
        }
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn work_size(&self) -> usize {
        self.work_size
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_compiled(&self) -> bool {
        self.program.is_some()
    }

    /// Bytes the next execution will upload.
    pub fn input_bytes(&self) -> u64 {
        self.inputs.iter().map(|e| e.byte_len() as u64).sum()
    }
}

impl<D: Device> fmt::Debug for KernelInstance<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelInstance")
            .field("data_type", &self.data_type)
            .field("entry_point", &self.entry_point)
            .field("state", &self.state)
            .field("work_size", &self.work_size)
            .field("inputs", &self.inputs.len())
            .field("output_specs", &self.output_specs)
            .field("outputs", &self.outputs.len())
            .finish()
    }
}
