//! # Módulo de Validação de Spec e Plano
//!
//! Valida o `TaskSpec` do usuário e o `Plan` do Planner antes de gastar
//! qualquer chamada de API com eles.
//!
//! ## Para leigos:
//!
//! Imagine que você está preenchendo um formulário importante.
//! Antes de enviar, o sistema verifica se todos os campos obrigatórios
//! estão preenchidos e se os valores fazem sentido.
//! Este módulo faz exatamente isso, duas vezes:
//! uma para a entrada do usuário, outra para a saída do Planner.
//!
//! ## Por que validar a saída de um modelo?
//!
//! O Planner é um LLM: ele pode devolver steps duplicados, dependências
//! para steps que não existem, caminhos que escapam do workspace.
//! Nada disso é recuperável depois, então rejeitamos cedo e de uma vez.
//!
//! ## Validações do TaskSpec:
//!
//! 1. **app_name**: identificador, até 256 caracteres, não reservado
//! 2. **features**: 1 a 10, distintas, identificadores de até 128
//! 3. **SDKs**: `21 <= min_sdk <= target_sdk <= 34`
//! 4. **Versões**: gradle e kotlin em formato semver `X.Y.Z`
//!
//! ## Validações do Plan:
//!
//! 1. Tamanho entre 1 e 25 steps
//! 2. `step_number` positivo e único
//! 3. `file_path` seguro (ver módulo `paths`) e único
//! 4. Toda dependência aponta para um step presente E anterior —
//!    a execução é sequencial por `step_number`, então a ordem declarada
//!    precisa ser uma ordem topológica válida do grafo
//!
//! Todas as violações são coletadas (não paramos na primeira) e
//! devolvidas juntas como um único erro de validação.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use thiserror::Error;

use crate::errors::SwarmError;
use crate::paths;
use crate::protocol::{Plan, TaskSpec};

// ============================================================================
// CONSTANTES
// ============================================================================

/// Limites estruturais da spec.
pub const MAX_APP_NAME_LEN: usize = 256;
pub const MAX_FEATURE_LEN: usize = 128;
pub const MIN_FEATURES: usize = 1;
pub const MAX_FEATURES: usize = 10;
pub const MIN_SDK_FLOOR: u32 = 21;
pub const MAX_SDK_CEILING: u32 = 34;

/// Limites estruturais do plano.
pub const MIN_PLAN_STEPS: usize = 1;
pub const MAX_PLAN_STEPS: usize = 25;

/// Palavras reservadas de Kotlin, a linguagem dos artefatos gerados.
///
/// Um app chamado `class` geraria código que não compila, então a
/// rejeição acontece aqui, antes de qualquer chamada de API.
const KOTLIN_RESERVED: &[&str] = &[
    "as", "break", "class", "continue", "do", "else", "false", "for", "fun", "if", "in",
    "interface", "is", "null", "object", "package", "return", "super", "this", "throw", "true",
    "try", "typealias", "typeof", "val", "var", "when", "while",
];

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("valid identifier regex"));

static SEMVER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("valid semver regex"));

// ============================================================================
// TIPOS DE VIOLAÇÃO
// ============================================================================

/// Violações individuais encontradas na validação.
///
/// Cada variante vira uma linha da mensagem final. O erro que sobe para
/// o chamador é sempre um único `SwarmError::Validation`.
#[derive(Debug, Error, PartialEq)]
pub enum Violation {
    #[error("app_name: identificador inválido '{name}'")]
    InvalidAppName { name: String },

    #[error("app_name: excede {max} caracteres")]
    AppNameTooLong { max: usize },

    #[error("app_name: '{name}' é palavra reservada")]
    ReservedAppName { name: String },

    #[error("features: esperado entre {min} e {max}, recebido {actual}")]
    FeatureCountOutOfRange { min: usize, max: usize, actual: usize },

    #[error("features[{index}]: identificador inválido '{name}'")]
    InvalidFeature { index: usize, name: String },

    #[error("features[{index}]: excede {max} caracteres")]
    FeatureTooLong { index: usize, max: usize },

    #[error("features[{index}]: '{name}' é palavra reservada")]
    ReservedFeature { index: usize, name: String },

    #[error("features: '{name}' duplicada")]
    DuplicateFeature { name: String },

    #[error("min_sdk {min_sdk}: fora do intervalo {floor}..={ceiling}")]
    MinSdkOutOfRange { min_sdk: u32, floor: u32, ceiling: u32 },

    #[error("target_sdk {target_sdk}: fora do intervalo {floor}..={ceiling}")]
    TargetSdkOutOfRange { target_sdk: u32, floor: u32, ceiling: u32 },

    #[error("min_sdk {min_sdk} maior que target_sdk {target_sdk}")]
    SdkRangeInverted { min_sdk: u32, target_sdk: u32 },

    #[error("{field}: versão '{version}' não está no formato X.Y.Z")]
    InvalidVersion { field: &'static str, version: String },

    #[error("plan: esperado entre {min} e {max} steps, recebido {actual}")]
    PlanSizeOutOfRange { min: usize, max: usize, actual: usize },

    #[error("step {step_number}: número deve ser positivo")]
    NonPositiveStepNumber { step_number: u32 },

    #[error("step {step_number}: número duplicado")]
    DuplicateStepNumber { step_number: u32 },

    #[error("step {step_number}: {message}")]
    UnsafeFilePath { step_number: u32, message: String },

    #[error("step {step_number}: file_path '{path}' duplicado")]
    DuplicateFilePath { step_number: u32, path: String },

    #[error("step {step_number}: dependência {dependency} não existe no plano")]
    UnknownDependency { step_number: u32, dependency: u32 },

    #[error("step {step_number}: dependência {dependency} não é anterior ao step")]
    ForwardDependency { step_number: u32, dependency: u32 },
}

/// Resultado da validação: ou nada, ou a lista completa de violações.
pub type ValidationResult = Result<(), Vec<Violation>>;

/// Converte a lista de violações no erro único que o orquestrador propaga.
pub fn into_error(violations: Vec<Violation>) -> SwarmError {
    let lines: Vec<String> = violations.iter().map(|v| v.to_string()).collect();
    SwarmError::Validation(lines.join("; "))
}

// ============================================================================
// VALIDAÇÃO DO TASK SPEC
// ============================================================================

/// Valida um `TaskSpec` completo, coletando todas as violações.
pub fn validate_task_spec(spec: &TaskSpec) -> ValidationResult {
    let mut errors = Vec::new();

    validate_app_name(&spec.app_name, &mut errors);
    validate_features(&spec.features, &mut errors);
    validate_sdk_range(spec.min_sdk, spec.target_sdk, &mut errors);
    validate_version("gradle_version", &spec.gradle_version, &mut errors);
    validate_version("kotlin_version", &spec.kotlin_version, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_app_name(name: &str, errors: &mut Vec<Violation>) {
    if name.len() > MAX_APP_NAME_LEN {
        errors.push(Violation::AppNameTooLong { max: MAX_APP_NAME_LEN });
    }
    if !IDENTIFIER_RE.is_match(name) {
        errors.push(Violation::InvalidAppName { name: name.to_string() });
        // Sem identificador válido, o teste de palavra reservada não faz sentido.
        return;
    }
    if KOTLIN_RESERVED.contains(&name) {
        errors.push(Violation::ReservedAppName { name: name.to_string() });
    }
}

fn validate_features(features: &[String], errors: &mut Vec<Violation>) {
    if features.len() < MIN_FEATURES || features.len() > MAX_FEATURES {
        errors.push(Violation::FeatureCountOutOfRange {
            min: MIN_FEATURES,
            max: MAX_FEATURES,
            actual: features.len(),
        });
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for (index, feature) in features.iter().enumerate() {
        if feature.len() > MAX_FEATURE_LEN {
            errors.push(Violation::FeatureTooLong { index, max: MAX_FEATURE_LEN });
        }
        if !IDENTIFIER_RE.is_match(feature) {
            errors.push(Violation::InvalidFeature {
                index,
                name: feature.clone(),
            });
        } else if KOTLIN_RESERVED.contains(&feature.as_str()) {
            errors.push(Violation::ReservedFeature {
                index,
                name: feature.clone(),
            });
        }
        if !seen.insert(feature.as_str()) {
            errors.push(Violation::DuplicateFeature { name: feature.clone() });
        }
    }
}

fn validate_sdk_range(min_sdk: u32, target_sdk: u32, errors: &mut Vec<Violation>) {
    if !(MIN_SDK_FLOOR..=MAX_SDK_CEILING).contains(&min_sdk) {
        errors.push(Violation::MinSdkOutOfRange {
            min_sdk,
            floor: MIN_SDK_FLOOR,
            ceiling: MAX_SDK_CEILING,
        });
    }
    if !(MIN_SDK_FLOOR..=MAX_SDK_CEILING).contains(&target_sdk) {
        errors.push(Violation::TargetSdkOutOfRange {
            target_sdk,
            floor: MIN_SDK_FLOOR,
            ceiling: MAX_SDK_CEILING,
        });
    }
    if min_sdk > target_sdk {
        errors.push(Violation::SdkRangeInverted { min_sdk, target_sdk });
    }
}

fn validate_version(field: &'static str, version: &str, errors: &mut Vec<Violation>) {
    if !SEMVER_RE.is_match(version) {
        errors.push(Violation::InvalidVersion {
            field,
            version: version.to_string(),
        });
    }
}

// ============================================================================
// VALIDAÇÃO DO PLANO
// ============================================================================

/// Valida um `Plan` devolvido pelo Planner, coletando todas as violações.
///
/// A execução percorre os steps em ordem crescente de `step_number` sem
/// consultar o grafo, então além de exigir que toda dependência exista,
/// exigimos que ela seja *anterior*: assim a ordem sequencial é sempre
/// uma ordem topológica válida e ciclos ficam impossíveis por construção.
pub fn validate_plan(plan: &Plan) -> ValidationResult {
    let mut errors = Vec::new();

    if plan.steps.len() < MIN_PLAN_STEPS || plan.steps.len() > MAX_PLAN_STEPS {
        errors.push(Violation::PlanSizeOutOfRange {
            min: MIN_PLAN_STEPS,
            max: MAX_PLAN_STEPS,
            actual: plan.steps.len(),
        });
    }

    let mut numbers: HashSet<u32> = HashSet::new();
    let mut file_paths: HashSet<&str> = HashSet::new();
    for step in &plan.steps {
        if step.step_number == 0 {
            errors.push(Violation::NonPositiveStepNumber { step_number: 0 });
        }
        if !numbers.insert(step.step_number) {
            errors.push(Violation::DuplicateStepNumber {
                step_number: step.step_number,
            });
        }
        if let Err(err) = paths::check_relative_path(&step.file_path) {
            errors.push(Violation::UnsafeFilePath {
                step_number: step.step_number,
                message: err.to_string(),
            });
        }
        if !file_paths.insert(step.file_path.as_str()) {
            errors.push(Violation::DuplicateFilePath {
                step_number: step.step_number,
                path: step.file_path.clone(),
            });
        }
    }

    // Dependências: presentes E estritamente anteriores.
    for step in &plan.steps {
        for &dependency in &step.dependencies {
            if !numbers.contains(&dependency) {
                errors.push(Violation::UnknownDependency {
                    step_number: step.step_number,
                    dependency,
                });
            } else if dependency >= step.step_number {
                errors.push(Violation::ForwardDependency {
                    step_number: step.step_number,
                    dependency,
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

// ============================================================================
// TESTES
// ============================================================================
