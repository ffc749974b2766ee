//! Groth16 over BN254
//!
//! ## Artifacts
//!
//! ```text
//! <id>_groth16.ccs   R1cs, ark-serialize compressed
//! <id>_groth16.pk    ark_groth16::ProvingKey<Bn254>, compressed
//! <id>_groth16.proof ark_groth16::Proof<Bn254>, compressed
//! ```
//!
//! Columns of the constraint system follow the witness layout: column 0 is
//! the constant one, then every public element, then every secret element.

use ark_bn254::Bn254;
use ark_ff::Zero;
use ark_groth16::{Groth16, ProvingKey};
use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystemRef, LinearCombination, SynthesisError, Variable};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_snark::SNARK;
use rand::rngs::OsRng;
use tracing::debug;

use super::backend::{ArtifactKind, BackendError, ProvingBackend};
use super::witness::Witness;
use crate::core::Fr;

/// One coefficient applied to one column.
#[derive(Debug, Clone, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct Term {
    /// Column index.
    pub column: u64,
    /// Coefficient.
    pub coeff: Fr,
}

/// `<a, z> * <b, z> = <c, z>`.
#[derive(Debug, Clone, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct Constraint {
    /// Left factor.
    pub a: Vec<Term>,
    /// Right factor.
    pub b: Vec<Term>,
    /// Product.
    pub c: Vec<Term>,
}

/// Rank-1 constraint system in witness column order.
#[derive(Debug, Clone, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct R1cs {
    /// Public element count.
    pub num_public: u64,
    /// Secret element count.
    pub num_secret: u64,
    /// Constraints.
    pub constraints: Vec<Constraint>,
}

fn invalid(kind: ArtifactKind, reason: impl ToString) -> BackendError {
    BackendError::InvalidArtifact { kind, reason: reason.to_string() }
}

impl R1cs {
    /// Total columns including the constant one.
    pub fn num_columns(&self) -> u64 {
        1 + self.num_public + self.num_secret
    }

    /// Decode a `.ccs` artifact and check every column reference.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BackendError> {
        let mut reader = bytes;
        let r1cs = Self::deserialize_compressed(&mut reader)
            .map_err(|e| invalid(ArtifactKind::ConstraintSystem, e))?;
        if !reader.is_empty() {
            return Err(invalid(
                ArtifactKind::ConstraintSystem,
                format!("{} trailing bytes", reader.len()),
            ));
        }

        let columns = r1cs.num_columns();
        for (index, constraint) in r1cs.constraints.iter().enumerate() {
            let terms = constraint.a.iter().chain(&constraint.b).chain(&constraint.c);
            if let Some(term) = terms.into_iter().find(|t| t.column >= columns) {
                return Err(invalid(
                    ArtifactKind::ConstraintSystem,
                    format!("constraint {} references column {} of {}", index, term.column, columns),
                ));
            }
        }
        Ok(r1cs)
    }

    /// Encode as a `.ccs` artifact.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BackendError> {
        let mut out = Vec::with_capacity(self.compressed_size());
        self.serialize_compressed(&mut out)
            .map_err(|e| invalid(ArtifactKind::ConstraintSystem, e))?;
        Ok(out)
    }

    /// Index of the first constraint `witness` violates.
    ///
    /// Columns past the end of the witness read as zero.
    pub fn first_unsatisfied(&self, witness: &Witness) -> Option<usize> {
        let mut z = Vec::with_capacity(witness.len() + 1);
        z.push(Fr::from(1u64));
        z.extend_from_slice(witness.values());

        let eval = |terms: &[Term]| -> Fr {
            terms.iter().fold(Fr::zero(), |acc, t| match z.get(t.column as usize) {
                Some(value) => acc + t.coeff * value,
                None => acc,
            })
        };
        self.constraints
            .iter()
            .position(|c| eval(&c.a) * eval(&c.b) != eval(&c.c))
    }
}

/// Replays an [`R1cs`] into arkworks, with or without an assignment.
#[derive(Debug, Clone, Copy)]
pub struct R1csCircuit<'a> {
    r1cs: &'a R1cs,
    witness: Option<&'a Witness>,
}

impl<'a> R1csCircuit<'a> {
    /// Shape only, for key generation.
    pub fn setup(r1cs: &'a R1cs) -> Self {
        Self { r1cs, witness: None }
    }

    /// Shape plus assignment, for proving.
    pub fn proving(r1cs: &'a R1cs, witness: &'a Witness) -> Self {
        Self { r1cs, witness: Some(witness) }
    }
}

impl ConstraintSynthesizer<Fr> for R1csCircuit<'_> {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> Result<(), SynthesisError> {
        let value = |index: usize| -> Result<Fr, SynthesisError> {
            self.witness
                .and_then(|w| w.values().get(index).copied())
                .ok_or(SynthesisError::AssignmentMissing)
        };

        let num_public = self.r1cs.num_public as usize;
        let num_secret = self.r1cs.num_secret as usize;
        let mut columns = Vec::with_capacity(1 + num_public + num_secret);
        columns.push(Variable::One);
        for i in 0..num_public {
            columns.push(cs.new_input_variable(|| value(i))?);
        }
        for i in 0..num_secret {
            columns.push(cs.new_witness_variable(|| value(num_public + i))?);
        }

        let lc = |terms: &[Term]| -> Result<LinearCombination<Fr>, SynthesisError> {
            terms
                .iter()
                .map(|t| {
                    let var = columns.get(t.column as usize).copied().ok_or(SynthesisError::Unsatisfiable)?;
                    Ok((t.coeff, var))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(LinearCombination)
        };
        for constraint in &self.r1cs.constraints {
            cs.enforce_constraint(lc(&constraint.a)?, lc(&constraint.b)?, lc(&constraint.c)?)?;
        }
        Ok(())
    }
}

/// Groth16 prover for BN254 artifacts.
#[derive(Debug, Clone, Copy, Default)]
pub struct Groth16Prover;

impl ProvingBackend for Groth16Prover {
    fn prove(&self, constraints: &[u8], proving_key: &[u8], witness: &Witness) -> Result<Vec<u8>, BackendError> {
        let r1cs = R1cs::from_bytes(constraints)?;
        let pk = ProvingKey::<Bn254>::deserialize_compressed(proving_key)
            .map_err(|e| invalid(ArtifactKind::ProvingKey, e))?;

        if r1cs.num_public != witness.nb_public() as u64 || r1cs.num_secret != witness.nb_secret() as u64 {
            return Err(BackendError::WitnessMismatch(format!(
                "constraint system expects {} public + {} secret, witness has {} + {}",
                r1cs.num_public,
                r1cs.num_secret,
                witness.nb_public(),
                witness.nb_secret()
            )));
        }
        if pk.vk.gamma_abc_g1.len() as u64 != 1 + r1cs.num_public || pk.l_query.len() as u64 != r1cs.num_secret {
            return Err(invalid(ArtifactKind::ProvingKey, "key was generated for a different circuit shape"));
        }
        if let Some(index) = r1cs.first_unsatisfied(witness) {
            return Err(BackendError::WitnessMismatch(format!("constraint {} is not satisfied", index)));
        }
        debug!("Groth16: {} constraints, {} columns", r1cs.constraints.len(), r1cs.num_columns());

        let proof = Groth16::<Bn254>::prove(&pk, R1csCircuit::proving(&r1cs, witness), &mut OsRng)
            .map_err(|e| BackendError::ProvingFailed(e.to_string()))?;

        let verified = Groth16::<Bn254>::verify(&pk.vk, witness.public_values(), &proof)
            .map_err(|e| BackendError::ProvingFailed(e.to_string()))?;
        if !verified {
            return Err(BackendError::ProvingFailed(
                "proof does not verify against the key's verifying key".into(),
            ));
        }

        let mut out = Vec::with_capacity(proof.compressed_size());
        proof
            .serialize_compressed(&mut out)
            .map_err(|e| BackendError::ProvingFailed(e.to_string()))?;
        Ok(out)
    }
}
