//! Built-in arithmetic tools: `Add`, `Subtract`, `Multiply`, `Divide`.

use serde_json::Value;

use crate::error::Result;
use crate::tool::{ParameterSchema, ToolDescriptor, ToolError, ToolRegistry, ToolSchema};

fn binary(
    name: &str,
    description: &str,
    op: fn(f64, f64) -> std::result::Result<f64, ToolError>,
) -> ToolDescriptor {
    let schema = ToolSchema {
        name: name.into(),
        description: description.into(),
        parameters: vec![
            ParameterSchema::number("a", "first number"),
            ParameterSchema::number("b", "second number"),
        ],
    };

    ToolDescriptor::new(schema, move |args| {
        let a = args.number("a")?;
        let b = args.number("b")?;
        let result = op(a, b)?;
        serde_json::Number::from_f64(result)
            .map(Value::Number)
            .ok_or_else(|| ToolError::Failed("Result is not a finite number.".into()))
    })
}

fn divide(a: f64, b: f64) -> std::result::Result<f64, ToolError> {
    if b == 0.0 {
        return Err(ToolError::Failed("Cannot divide by zero.".into()));
    }
    Ok(a / b)
}

/// Descriptors for the four arithmetic tools
pub fn math_tools() -> Vec<ToolDescriptor> {
    vec![
        binary("Add", "Adds two numbers.", |a, b| Ok(a + b)),
        binary("Subtract", "Subtracts two numbers.", |a, b| Ok(a - b)),
        binary("Multiply", "Multiplies two numbers.", |a, b| Ok(a * b)),
        binary("Divide", "Divides two numbers.", divide),
    ]
}

/// Register the arithmetic tools into `registry`
pub fn register_math_tools(registry: &mut ToolRegistry) -> Result<()> {
    for tool in math_tools() {
        registry.register(tool)?;
    }
    Ok(())
}
