// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A minimal GLSL declaration scanner used by the headless backend to give simulated
//! programs realistic attribute and uniform locations.

use std::collections::HashMap;

/// Attribute and uniform declarations found in a program's sources.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProgramReflection {
    /// Vertex inputs and their locations.
    pub attributes: HashMap<String, u32>,
    /// Uniform names (array uniforms also register `name[0]`).
    pub uniforms: Vec<String>,
}

fn strip_comment(line: &str) -> &str {
    line.split("//").next().unwrap_or("").trim()
}

fn explicit_location(line: &str) -> Option<u32> {
    let start = line.find("location")?;
    let rest = &line[start + "location".len()..];
    let rest = rest.trim_start().strip_prefix('=')?.trim_start();
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// The declared identifier of `... type name;` or `... type name[N];`.
fn declared_name(decl: &str) -> Option<(&str, bool)> {
    let decl = decl.trim_end_matches(';').trim();
    let last = decl.split_whitespace().last()?;
    match last.find('[') {
        Some(i) => Some((&last[..i], true)),
        None => Some((last, false)),
    }
}

/// Scans vertex-stage `in` declarations and `uniform` declarations in any stage.
///
/// Attributes without an explicit `layout(location = N)` get the next free location
/// after every explicit one, in declaration order, as a linker would.
pub fn reflect(vertex_source: Option<&str>, all_sources: &[&str]) -> ProgramReflection {
    let mut reflection = ProgramReflection::default();
    let mut implicit = Vec::new();

    if let Some(src) = vertex_source {
        for raw in src.lines() {
            let line = strip_comment(raw);
            let decl = match line.find(')') {
                Some(i) if line.starts_with("layout") => line[i + 1..].trim(),
                _ => line,
            };
            let Some(rest) = decl.strip_prefix("in ") else {
                continue;
            };
            let Some((name, _)) = declared_name(rest) else {
                continue;
            };
            match explicit_location(line) {
                Some(loc) => {
                    reflection.attributes.insert(name.to_owned(), loc);
                }
                None => implicit.push(name.to_owned()),
            }
        }
    }
    let mut next = reflection
        .attributes
        .values()
        .max()
        .map_or(0, |max| max + 1);
    for name in implicit {
        reflection.attributes.insert(name, next);
        next += 1;
    }

    for src in all_sources {
        for raw in src.lines() {
            let line = strip_comment(raw);
            let decl = match line.find(')') {
                Some(i) if line.starts_with("layout") => line[i + 1..].trim(),
                _ => line,
            };
            let Some(rest) = decl.strip_prefix("uniform ") else {
                continue;
            };
            // Skip interface blocks.
            if rest.contains('{') || !rest.ends_with(';') {
                continue;
            }
            if let Some((name, is_array)) = declared_name(rest) {
                if !reflection.uniforms.iter().any(|u| u == name) {
                    reflection.uniforms.push(name.to_owned());
                    if is_array {
                        reflection.uniforms.push(format!("{name}[0]"));
                    }
                }
            }
        }
    }
    reflection
}

#[cfg(test)]
mod tests {
    use super::*;

    const VS: &str = r#"
        #version 430 core
        layout(location = 0) in vec3 aPosition;
        layout (location = 6) in vec4 aInstanceRow0; // instance stream
        in vec2 aUv;
        uniform mat4 uViewProj;
        uniform float uLODDistances[4];
        void main() {}
    "#;

    #[test]
    fn finds_explicit_and_implicit_attributes() {
        let r = reflect(Some(VS), &[VS]);
        assert_eq!(r.attributes["aPosition"], 0);
        assert_eq!(r.attributes["aInstanceRow0"], 6);
        assert_eq!(r.attributes["aUv"], 7);
    }

    #[test]
    fn finds_uniforms_and_array_aliases() {
        let r = reflect(Some(VS), &[VS]);
        assert!(r.uniforms.contains(&"uViewProj".to_owned()));
        assert!(r.uniforms.contains(&"uLODDistances".to_owned()));
        assert!(r.uniforms.contains(&"uLODDistances[0]".to_owned()));
    }
}
