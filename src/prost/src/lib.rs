// Copyright 2023 RisingWave Labs
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

//! Wire messages for serialized functions, operators, plans and query
//! submission. The transport carrying them (gRPC or otherwise) lives outside
//! this workspace; these are the payloads it moves.

use prost::Message;
use thiserror::Error;

/// Raised while decoding a message whose required field is absent.
#[derive(Error, Debug)]
#[error("Field not found: `{0}`")]
pub struct PbFieldNotFound(pub &'static str);

/// A serialized function tree node.
#[derive(Clone, PartialEq, Message)]
pub struct PbFunction {
    /// The function kind tag, e.g. `FieldAccess`, `Add`, `Equals`.
    #[prost(string, tag = "1")]
    pub function_type: String,
    /// The inferred stamp as its textual data type name; empty before
    /// inference.
    #[prost(string, tag = "2")]
    pub stamp: String,
    #[prost(message, repeated, tag = "3")]
    pub children: Vec<PbFunction>,
    /// Kind-specific payload: the accessed field name, or the constant
    /// literal rendered as text.
    #[prost(string, optional, tag = "4")]
    pub field_name: Option<String>,
    #[prost(string, optional, tag = "5")]
    pub constant_value: Option<String>,
}

/// A serialized schema field.
#[derive(Clone, PartialEq, Message)]
pub struct PbField {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub data_type: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct PbSchema {
    #[prost(message, repeated, tag = "1")]
    pub fields: Vec<PbField>,
}

/// A serialized logical operator subtree.
#[derive(Clone, PartialEq, Message)]
pub struct PbLogicalOperator {
    #[prost(uint64, tag = "1")]
    pub operator_id: u64,
    /// The operator kind tag, e.g. `Source`, `Filter`, `Join`.
    #[prost(string, tag = "2")]
    pub kind: String,
    #[prost(message, repeated, tag = "3")]
    pub children: Vec<PbLogicalOperator>,
    /// Kind-specific functions (predicates, map expressions, join conditions).
    #[prost(message, repeated, tag = "4")]
    pub functions: Vec<PbFunction>,
    /// The inferred output schema, when type inference ran.
    #[prost(message, optional, tag = "5")]
    pub output_schema: Option<PbSchema>,
    /// The assigned worker, when placement ran.
    #[prost(uint64, optional, tag = "6")]
    pub placement_worker_id: Option<u64>,
    /// Remaining payload as kind-specific key/value entries (window specs,
    /// source names, aggregation descriptors).
    #[prost(map = "string, string", tag = "7")]
    pub attributes: ::std::collections::HashMap<String, String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PbLogicalPlan {
    #[prost(uint64, tag = "1")]
    pub query_id: u64,
    #[prost(string, tag = "2")]
    pub original_sql: String,
    #[prost(message, repeated, tag = "3")]
    pub root_operators: Vec<PbLogicalOperator>,
}

/// One worker's share of a decomposed plan.
#[derive(Clone, PartialEq, Message)]
pub struct PbWorkerSubPlan {
    #[prost(uint64, tag = "1")]
    pub worker_id: u64,
    #[prost(message, optional, tag = "2")]
    pub plan: Option<PbLogicalPlan>,
}

/// The submission payload: per-worker subplans plus the optimized plan they
/// were decomposed from.
#[derive(Clone, PartialEq, Message)]
pub struct PbQuerySubmission {
    #[prost(message, repeated, tag = "1")]
    pub subplans: Vec<PbWorkerSubPlan>,
    #[prost(message, optional, tag = "2")]
    pub optimized_plan: Option<PbLogicalPlan>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_encode_decode_round_trip() {
        let function = PbFunction {
            function_type: "Equals".into(),
            stamp: "BOOL".into(),
            children: vec![
                PbFunction {
                    function_type: "FieldAccess".into(),
                    stamp: "INT32".into(),
                    children: vec![],
                    field_name: Some("id".into()),
                    constant_value: None,
                },
                PbFunction {
                    function_type: "Constant".into(),
                    stamp: "INT32".into(),
                    children: vec![],
                    field_name: None,
                    constant_value: Some("42".into()),
                },
            ],
            field_name: None,
            constant_value: None,
        };
        let bytes = function.encode_to_vec();
        assert_eq!(PbFunction::decode(bytes.as_slice()).unwrap(), function);
    }

    #[test]
    fn submission_encode_decode_round_trip() {
        let submission = PbQuerySubmission {
            subplans: vec![PbWorkerSubPlan {
                worker_id: 3,
                plan: Some(PbLogicalPlan {
                    query_id: 1,
                    original_sql: "SELECT * FROM nums".into(),
                    root_operators: vec![PbLogicalOperator {
                        operator_id: 9,
                        kind: "Sink".into(),
                        ..Default::default()
                    }],
                }),
            }],
            optimized_plan: None,
        };
        let bytes = submission.encode_to_vec();
        assert_eq!(
            PbQuerySubmission::decode(bytes.as_slice()).unwrap(),
            submission
        );
    }
}
