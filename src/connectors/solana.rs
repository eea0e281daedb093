//! Solana connector
//!
//! Mints the bridged SPL token to a recipient's associated token account.
//! Unlike the EVM legs, the recipient's token account may not exist yet and
//! has to be created before minting.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    system_program,
    transaction::Transaction,
};
use tracing::{debug, info};

use crate::config::{ExecutionConfig, SolanaConfig};

pub const TOKEN_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");
pub const ASSOCIATED_TOKEN_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// SPL Token `MintTo` instruction tag
const MINT_TO_TAG: u8 = 7;
/// Associated Token Account `CreateIdempotent` instruction tag
const CREATE_IDEMPOTENT_TAG: u8 = 1;

#[async_trait]
pub trait SolanaConnector: Send + Sync {
    /// The bridged token's mint
    fn mint(&self) -> Pubkey;

    /// Resolve the owner's associated token account, creating it if missing
    async fn ensure_token_account(&self, owner: &Pubkey) -> Result<Pubkey>;

    /// Sign and send a MintTo without waiting for confirmation
    async fn submit_mint(&self, token_account: &Pubkey, amount: u64) -> Result<Signature>;

    /// `Some(success)` once processed, `None` if the cluster has no record yet
    async fn signature_status(&self, signature: &Signature) -> Result<Option<bool>>;

    /// Poll the signature until processed or the confirmation timeout elapses
    async fn wait_for_signature(&self, signature: &Signature) -> Result<Option<bool>>;
}

/// Derive the associated token account for `owner` and `mint`
pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[owner.as_ref(), TOKEN_PROGRAM_ID.as_ref(), mint.as_ref()],
        &ASSOCIATED_TOKEN_PROGRAM_ID,
    )
    .0
}

/// CreateIdempotent succeeds whether or not the account already exists
pub fn create_associated_token_account_idempotent(
    payer: &Pubkey,
    owner: &Pubkey,
    mint: &Pubkey,
) -> Instruction {
    let ata = associated_token_address(owner, mint);
    Instruction {
        program_id: ASSOCIATED_TOKEN_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(ata, false),
            AccountMeta::new_readonly(*owner, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
        ],
        data: vec![CREATE_IDEMPOTENT_TAG],
    }
}

pub fn mint_to(
    mint: &Pubkey,
    destination: &Pubkey,
    authority: &Pubkey,
    amount: u64,
) -> Instruction {
    let mut data = Vec::with_capacity(9);
    data.push(MINT_TO_TAG);
    data.extend_from_slice(&amount.to_le_bytes());
    Instruction {
        program_id: TOKEN_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(*mint, false),
            AccountMeta::new(*destination, false),
            AccountMeta::new_readonly(*authority, true),
        ],
        data,
    }
}

/// Decode a base58 64-byte keypair
pub fn keypair_from_base58(b58: &str) -> Result<Keypair> {
    let bytes = bs58::decode(b58)
        .into_vec()
        .map_err(|_| eyre!("Invalid base58 encoding for Solana keypair"))?;
    Keypair::from_bytes(&bytes).map_err(|_| eyre!("Invalid Solana keypair bytes"))
}

/// Nonblocking JSON-RPC implementation
pub struct SolanaRpcConnector {
    client: RpcClient,
    mint: Pubkey,
    /// Mint authority; also pays fees and ATA rent
    authority: Keypair,
    poll_interval: Duration,
    confirmation_timeout: Duration,
}

impl SolanaRpcConnector {
    pub fn new(config: &SolanaConfig, execution: &ExecutionConfig) -> Result<Self> {
        let mint = Pubkey::from_str(&config.mint_address).wrap_err("Invalid Solana mint address")?;
        let authority = keypair_from_base58(&config.mint_authority_keypair)?;
        let client =
            RpcClient::new_with_commitment(config.rpc_url.clone(), CommitmentConfig::confirmed());

        info!(
            mint = %mint,
            authority = %authority.pubkey(),
            decimals = config.decimals,
            "Solana connector initialized"
        );

        Ok(Self {
            client,
            mint,
            authority,
            poll_interval: execution.receipt_poll_interval(),
            confirmation_timeout: execution.confirmation_timeout(),
        })
    }

    async fn signed_transaction(&self, instructions: &[Instruction]) -> Result<Transaction> {
        let blockhash = self
            .client
            .get_latest_blockhash()
            .await
            .wrap_err("Failed to get latest Solana blockhash")?;

        Ok(Transaction::new_signed_with_payer(
            instructions,
            Some(&self.authority.pubkey()),
            &[&self.authority],
            blockhash,
        ))
    }
}

#[async_trait]
impl SolanaConnector for SolanaRpcConnector {
    fn mint(&self) -> Pubkey {
        self.mint
    }

    async fn ensure_token_account(&self, owner: &Pubkey) -> Result<Pubkey> {
        let ata = associated_token_address(owner, &self.mint);

        let existing = self
            .client
            .get_account_with_commitment(&ata, self.client.commitment())
            .await
            .wrap_err_with(|| format!("Failed to look up token account {}", ata))?
            .value;

        if let Some(account) = existing {
            if account.owner != TOKEN_PROGRAM_ID {
                return Err(eyre!(
                    "Account {} exists but is not owned by the token program",
                    ata
                ));
            }
            debug!(owner = %owner, token_account = %ata, "Token account exists");
            return Ok(ata);
        }

        let ix =
            create_associated_token_account_idempotent(&self.authority.pubkey(), owner, &self.mint);
        let tx = self.signed_transaction(&[ix]).await?;
        let signature = self
            .client
            .send_and_confirm_transaction(&tx)
            .await
            .map_err(|e| eyre!("Failed to create token account {} for {}: {}", ata, owner, e))?;

        info!(
            owner = %owner,
            token_account = %ata,
            signature = %signature,
            "Created associated token account"
        );
        Ok(ata)
    }

    async fn submit_mint(&self, token_account: &Pubkey, amount: u64) -> Result<Signature> {
        let ix = mint_to(&self.mint, token_account, &self.authority.pubkey(), amount);
        let tx = self.signed_transaction(&[ix]).await?;

        self.client
            .send_transaction(&tx)
            .await
            .map_err(|e| eyre!("Failed to send Solana mint transaction: {}", e))
    }

    async fn signature_status(&self, signature: &Signature) -> Result<Option<bool>> {
        let status = self
            .client
            .get_signature_status(signature)
            .await
            .wrap_err_with(|| format!("Failed to get status of {}", signature))?;

        Ok(status.map(|result| result.is_ok()))
    }

    async fn wait_for_signature(&self, signature: &Signature) -> Result<Option<bool>> {
        let deadline = tokio::time::Instant::now() + self.confirmation_timeout;
        loop {
            if let Some(success) = self.signature_status(signature).await? {
                return Ok(Some(success));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
